//! Configuration
//!
//! `SyncConfig` is read from a JSON file (created with defaults on first
//! run) and can be overridden from `COLONY_SYNC_*` environment variables.

use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::info;

use crate::network::lobby::{is_valid_password, MIN_PASSWORD_LEN};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read or written.
    #[error("config io error: {0}")]
    Io(#[from] io::Error),

    /// File is not valid config JSON.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Environment variable has an unusable value.
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },

    /// Lobby password shorter than the minimum.
    #[error("lobby password must be empty or at least {} characters", MIN_PASSWORD_LEN)]
    WeakPassword,
}

/// Settings used when this peer hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Maximum peers in a lobby, host included.
    pub max_lobby_size: usize,
    /// Inbound messages applied per simulation tick.
    pub max_messages_per_poll: usize,
    /// WebSocket listen address.
    pub bind_addr: String,
    /// Lobby password; empty for an open lobby.
    pub password: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            max_lobby_size: 4,
            max_messages_per_poll: 128,
            bind_addr: "0.0.0.0:11000".to_string(),
            password: String::new(),
        }
    }
}

/// Settings used when this peer joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Host WebSocket URL.
    pub host_url: String,
    /// How long to wait for lobby metadata before joining anyway.
    pub metadata_timeout_ms: u64,
    /// How often to check for lobby metadata.
    pub metadata_poll_interval_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host_url: "ws://127.0.0.1:11000".to_string(),
            metadata_timeout_ms: 2000,
            metadata_poll_interval_ms: 100,
        }
    }
}

impl ClientSettings {
    /// Metadata timeout as a duration.
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    /// Metadata poll interval as a duration.
    pub fn metadata_poll_interval(&self) -> Duration {
        Duration::from_millis(self.metadata_poll_interval_ms)
    }
}

/// Replication behavior switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    /// Give anchored buildings location-derived ids on every peer.
    pub deterministic_building_ids: bool,
    /// Drop envelopes whose cell disagrees with the target's cell.
    pub enforce_cell_check: bool,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            deterministic_building_ids: true,
            enforce_cell_check: true,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Hosting.
    pub host: HostSettings,
    /// Joining.
    pub client: ClientSettings,
    /// Replication.
    pub replication: ReplicationSettings,
}

impl SyncConfig {
    /// Read the config file, writing the defaults first if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => {
                let config: Self = serde_json::from_str(&text)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let config = Self::default();
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, serde_json::to_string_pretty(&config)?)?;
                info!(path = %path.display(), "Wrote default config");
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Reject settings no peer could use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_password(&self.host.password) {
            return Err(ConfigError::WeakPassword);
        }
        Ok(())
    }

    /// Overlay `COLONY_SYNC_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = var("COLONY_SYNC_MAX_LOBBY_SIZE") {
            self.host.max_lobby_size = parse("COLONY_SYNC_MAX_LOBBY_SIZE", v)?;
        }
        if let Some(v) = var("COLONY_SYNC_MAX_MESSAGES_PER_POLL") {
            self.host.max_messages_per_poll = parse("COLONY_SYNC_MAX_MESSAGES_PER_POLL", v)?;
        }
        if let Some(v) = var("COLONY_SYNC_BIND_ADDR") {
            self.host.bind_addr = v;
        }
        if let Some(v) = var("COLONY_SYNC_PASSWORD") {
            self.host.password = v;
        }
        if let Some(v) = var("COLONY_SYNC_HOST_URL") {
            self.client.host_url = v;
        }
        if let Some(v) = var("COLONY_SYNC_METADATA_TIMEOUT_MS") {
            self.client.metadata_timeout_ms = parse("COLONY_SYNC_METADATA_TIMEOUT_MS", v)?;
        }
        if let Some(v) = var("COLONY_SYNC_METADATA_POLL_INTERVAL_MS") {
            self.client.metadata_poll_interval_ms =
                parse("COLONY_SYNC_METADATA_POLL_INTERVAL_MS", v)?;
        }
        if let Some(v) = var("COLONY_SYNC_DETERMINISTIC_IDS") {
            self.replication.deterministic_building_ids = flag("COLONY_SYNC_DETERMINISTIC_IDS", v)?;
        }
        if let Some(v) = var("COLONY_SYNC_CELL_CHECK") {
            self.replication.enforce_cell_check = flag("COLONY_SYNC_CELL_CHECK", v)?;
        }
        self.validate()
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv { key, value })
}

fn flag(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { key, value }),
    }
}
