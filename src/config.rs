//! Runtime configuration, loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What to do with a command the server explicitly rejects.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Remove it from the queue and carry on.
    #[default]
    Drop,
    /// Park it in the dead-letter table for later inspection.
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub database_path: String,
    pub api_base_url: String,
    /// Wait after a reconnect before draining, to ride out flaky blips.
    pub settle_delay_ms: u64,
    pub submit_timeout_secs: u64,
    /// 0 disables active reachability checks.
    pub reachability_interval_secs: u64,
    pub rejection_policy: RejectionPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: "labour-sync.db".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            settle_delay_ms: 1500,
            submit_timeout_secs: 15,
            reachability_interval_secs: 30,
            rejection_policy: RejectionPolicy::Drop,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SyncConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn reachability_interval(&self) -> Option<Duration> {
        (self.reachability_interval_secs > 0)
            .then(|| Duration::from_secs(self.reachability_interval_secs))
    }
}
