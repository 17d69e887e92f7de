use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use clap::{Parser, Subcommand, ValueEnum};
use relay_core::{
    load_relay_config, ControlResponse, OutcomeStatus, RelayConfig, SessionStatus, StatusReport,
};
use serde::Serialize;
use thiserror::Error;

pub mod commands;

use commands::control::ControlClient;
use commands::serve::ServeArgs;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] relay_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(#[from] relay_core::ServerError),
    #[error("relay rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("{0}")]
    HealthCheck(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "RTSP to HLS relay control interface", long_about = None)]
pub struct Cli {
    /// Path to relay.toml
    #[arg(long, default_value = "configs/relay.toml")]
    pub config: PathBuf,
    /// Base URL of a running relay (used by start/stop/restart/status)
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    pub server: String,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay HTTP service
    Serve(ServeArgs),
    /// Start (or replace) the relay for an RTSP source
    Start {
        /// RTSP URL of the camera or encoder
        rtsp_url: String,
    },
    /// Stop the active relay
    Stop,
    /// Relaunch the relay with its recorded source
    Restart,
    /// Show the relay's session status
    Status,
    /// Run local readiness checks
    Health,
}

pub async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Serve(args) => {
            let context = AppContext::new(&cli)?;
            commands::serve::run(context.config, args).await?;
        }
        Commands::Start { rtsp_url } => {
            let response = ControlClient::new(&cli.server)?.start(rtsp_url).await?;
            render(&response, cli.format)?;
        }
        Commands::Stop => {
            let response = ControlClient::new(&cli.server)?.stop().await?;
            render(&response, cli.format)?;
        }
        Commands::Restart => {
            let response = ControlClient::new(&cli.server)?.restart().await?;
            render(&response, cli.format)?;
        }
        Commands::Status => {
            let report = ControlClient::new(&cli.server)?.status().await?;
            render(&report, cli.format)?;
        }
        Commands::Health => {
            let context = AppContext::new(&cli)?;
            let report = context.health_check().await;
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::HealthCheck(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: RelayConfig,
    config_path: PathBuf,
    config_found: bool,
}

impl AppContext {
    /// File (when present), then `RELAY_*` environment overrides.
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config_found = config_path.is_file();
        let mut config = if config_found {
            load_relay_config(&config_path)?
        } else {
            RelayConfig::default()
        };
        config.apply_process_env()?;
        Ok(Self {
            config,
            config_path,
            config_found,
        })
    }

    async fn health_check(&self) -> Vec<HealthEntry> {
        vec![
            self.check_config(),
            self.check_directory("output_dir", &self.config.output_dir()),
            self.check_transcoder(&self.config.transcoder_binary()).await,
        ]
    }

    fn check_config(&self) -> HealthEntry {
        if self.config_found {
            HealthEntry::ok("relay.toml", format!("{}", self.config_path.display()))
        } else {
            HealthEntry::warn(
                "relay.toml",
                format!("{} missing, using defaults", self.config_path.display()),
            )
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::error(
                name,
                format!("{} exists but is not a directory", path.display()),
            ),
            Err(_) => HealthEntry::warn(
                name,
                format!("{} missing, created on first start", path.display()),
            ),
        }
    }

    async fn check_transcoder(&self, binary: &Path) -> HealthEntry {
        let result = tokio::process::Command::new(binary)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => {
                HealthEntry::ok("transcoder", format!("{}", binary.display()))
            }
            Ok(status) => HealthEntry::error(
                "transcoder",
                format!("{} -version failed ({status})", binary.display()),
            ),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                HealthEntry::error("transcoder", format!("{} not found", binary.display()))
            }
            Err(err) => HealthEntry::error(
                "transcoder",
                format!("cannot run {}: {err}", binary.display()),
            ),
        }
    }
}

fn state_label(state: SessionStatus) -> &'static str {
    match state {
        SessionStatus::Idle => "idle",
        SessionStatus::Running => "running",
        SessionStatus::Stopping => "stopping",
        SessionStatus::Error => "error",
    }
}

impl DisplayFallback for ControlResponse {
    fn display(&self) -> String {
        let label = match self.status {
            OutcomeStatus::Success => "OK",
            OutcomeStatus::Info => "INFO",
            OutcomeStatus::Error => "ERROR",
        };
        let mut lines = vec![format!("[{label}] {}", self.message)];
        if let Some(source) = &self.rtsp_url {
            lines.push(format!("  RTSP: {source}"));
        }
        if let Some(hls) = &self.hls_url {
            lines.push(format!("  HLS: {hls}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Stream: {} ({})",
            if self.is_running { "running" } else { "stopped" },
            state_label(self.state)
        )];
        if let Some(source) = &self.rtsp_url {
            lines.push(format!("  RTSP: {source}"));
        }
        if let Some(hls) = &self.hls_url {
            lines.push(format!("  HLS: {hls}"));
        }
        if let Some(id) = &self.session_id {
            lines.push(format!("  Session: {id}"));
        }
        if let Some(started) = &self.started_at {
            lines.push(format!("  Started: {}", started.to_rfc3339()));
        }
        if let Some(exit) = &self.last_exit {
            lines.push(format!("  Last exit: {exit}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for HealthEntry {
    fn display(&self) -> String {
        format!(
            "[{status}] {name}: {detail}",
            status = self.status,
            name = self.name,
            detail = self.detail
        )
    }
}
