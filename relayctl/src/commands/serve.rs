use std::path::PathBuf;

use clap::Args;
use relay_core::RelayConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::Result;

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Bind address (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,
    /// Bind port (overrides server.port)
    #[arg(long)]
    pub port: Option<u16>,
    /// Directory for the playlist and segments (overrides paths.output_dir)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

impl ServeArgs {
    /// Flags win over both the file and the environment.
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = &self.output_dir {
            config.paths.output_dir = dir.display().to_string();
        }
    }
}

pub async fn run(mut config: RelayConfig, args: &ServeArgs) -> Result<()> {
    init_tracing();
    args.apply(&mut config);
    info!(
        host = %config.server.host,
        port = config.server.port,
        output_dir = %config.output_dir().display(),
        transcoder = %config.transcoder_binary().display(),
        "starting relay service"
    );
    relay_core::serve(config).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
