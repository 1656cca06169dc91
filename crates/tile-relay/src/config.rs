use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use crate::cli::Cli;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_uplink")]
    pub uplink: String,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            uplink: default_uplink(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MapConfig {
    #[serde(default)]
    pub id: String,
}

/// Independent verbosity switches. Errors are always logged.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub info: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_true")]
    pub warn: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            info: default_true(),
            debug: false,
            warn: default_true(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_state_file")]
    pub path: PathBuf,
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_state_file(),
            save_interval_secs: default_save_interval(),
        }
    }
}

impl Config {
    /// Apply command-line overrides on top of file values.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(ref host) = cli.listen_host {
            self.websocket.host = host.clone();
        }
        if let Some(port) = cli.listen_port {
            self.websocket.port = port;
        }
        if let Some(ref uplink) = cli.uplink {
            self.websocket.uplink = uplink.clone();
        }
        if let Some(ref map_id) = cli.map_id {
            self.map.id = map_id.clone();
        }
        if let Some(ref path) = cli.state_file {
            self.persistence.path = path.clone();
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.websocket.reconnect_delay_secs)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.persistence.save_interval_secs.max(1))
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_uplink() -> String {
    "ws://127.0.0.1:9090".to_string()
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_state_file() -> PathBuf {
    PathBuf::from(tile_cache::DEFAULT_STATE_FILE)
}

fn default_save_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// A missing file yields the defaults with a warning.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    from_str(&contents).with_context(|| format!("failed to parse config file {}", path.display()))
}

pub fn from_str(yaml: &str) -> anyhow::Result<Config> {
    Ok(serde_yml::from_str(yaml)?)
}
