use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tm_bus::{DEFAULT_CHANNEL_PREFIX, DEFAULT_TM_DATA_KEY};

use crate::endpoint::{DEFAULT_DATA_SINK_PORT, DEFAULT_REDIS_PORT};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

/// Tunables for the start-up sequence.
///
/// Every field has a default, so an absent or partial YAML file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
    /// Bus key the data sink writes the operational report to.
    #[serde(default = "default_tm_data_key")]
    pub tm_data_key: String,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    #[serde(default = "default_data_sink_port")]
    pub data_sink_port: u16,
    #[serde(default = "default_startup_timeout_secs")]
    pub data_sink_startup_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub data_sink_poll_interval_ms: u64,
    /// How long a stopping data sink gets before it is killed.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_redis_server_bin")]
    pub redis_server_bin: String,
    #[serde(default = "default_ssh_bin")]
    pub ssh_bin: String,
}

fn default_channel_prefix() -> String {
    DEFAULT_CHANNEL_PREFIX.to_string()
}

fn default_tm_data_key() -> String {
    DEFAULT_TM_DATA_KEY.to_string()
}

fn default_redis_port() -> u16 {
    DEFAULT_REDIS_PORT
}

fn default_data_sink_port() -> u16 {
    DEFAULT_DATA_SINK_PORT
}

fn default_startup_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_shutdown_grace_secs() -> u64 {
    60
}

fn default_redis_server_bin() -> String {
    "redis-server".to_string()
}

fn default_ssh_bin() -> String {
    "ssh".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel_prefix: default_channel_prefix(),
            tm_data_key: default_tm_data_key(),
            redis_port: default_redis_port(),
            data_sink_port: default_data_sink_port(),
            data_sink_startup_timeout_secs: default_startup_timeout_secs(),
            data_sink_poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            redis_server_bin: default_redis_server_bin(),
            ssh_bin: default_ssh_bin(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&data).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.data_sink_startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.data_sink_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
