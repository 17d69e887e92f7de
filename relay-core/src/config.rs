use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub transcoder: TranscoderSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderSection {
    /// Resolved through `PATH` when not absolute.
    #[serde(default = "default_binary")]
    pub binary: String,
}

impl Default for TranscoderSection {
    fn default() -> Self {
        Self {
            binary: default_binary(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            kill_timeout_ms: default_kill_timeout_ms(),
            command_buffer: default_command_buffer(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_output_dir() -> String {
    "./streams".to_string()
}

fn default_binary() -> String {
    "ffmpeg".to_string()
}

fn default_grace_period_ms() -> u64 {
    5_000
}

fn default_kill_timeout_ms() -> u64 {
    2_000
}

fn default_command_buffer() -> usize {
    32
}

impl RelayConfig {
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.output_dir)
    }

    pub fn transcoder_binary(&self) -> PathBuf {
        PathBuf::from(&self.transcoder.binary)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.supervisor.grace_period_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.supervisor.kill_timeout_ms)
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        let candidate = format!("{}:{}", self.server.host, self.server.port);
        candidate
            .parse()
            .map_err(|_| ConfigError::Address(candidate.clone()))
    }

    /// Applies `RELAY_*` overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("RELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("RELAY_PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::Env {
                key: "RELAY_PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(dir) = lookup("RELAY_OUTPUT_DIR") {
            self.paths.output_dir = dir;
        }
        if let Some(origins) = lookup("RELAY_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(binary) = lookup("RELAY_FFMPEG") {
            self.transcoder.binary = binary;
        }
        Ok(())
    }
}

pub fn load_relay_config<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
