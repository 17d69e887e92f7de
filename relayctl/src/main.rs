use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = relayctl::Cli::parse();
    if let Err(err) = relayctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
