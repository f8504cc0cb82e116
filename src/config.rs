//! Configuration for the coordination layer
//!
//! # Configuration File Format
//!
//! TOML format, by default `agentcomm.toml`:
//!
//! ```toml
//! [communications]
//! path = "communications.json"
//! max_conflict_retries = 5
//!
//! [watcher]
//! enabled = true
//! poll_interval_ms = 500
//! channel_capacity = 256
//! ```
//!
//! Environment variables override file values:
//! `AGENTCOMM_FILE`, `AGENTCOMM_POLL_INTERVAL_MS`, `AGENTCOMM_MAX_RETRIES`.

use crate::communications::DEFAULT_MAX_CONFLICT_RETRIES;
use crate::error::{CommsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const ENV_FILE: &str = "AGENTCOMM_FILE";
pub const ENV_POLL_INTERVAL_MS: &str = "AGENTCOMM_POLL_INTERVAL_MS";
pub const ENV_MAX_RETRIES: &str = "AGENTCOMM_MAX_RETRIES";

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommsConfig {
    /// Shared document settings
    #[serde(default)]
    pub communications: CommunicationsSettings,

    /// Change watcher settings
    #[serde(default)]
    pub watcher: WatcherSettings,
}

/// Shared document settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationsSettings {
    /// Path of the coordination document
    #[serde(default = "default_comm_path")]
    pub path: PathBuf,

    /// Retries when another process changes the revision mid-update
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

impl Default for CommunicationsSettings {
    fn default() -> Self {
        Self {
            path: default_comm_path(),
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

/// Change watcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherSettings {
    /// Start the watcher with the coordinator
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Broadcast buffer per subscriber
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl WatcherSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_comm_path() -> PathBuf {
    PathBuf::from("communications.json")
}

fn default_max_conflict_retries() -> u32 {
    DEFAULT_MAX_CONFLICT_RETRIES
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_channel_capacity() -> usize {
    256
}

impl CommsConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file not found, using defaults: {:?}", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| CommsError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CommsConfig = toml::from_str(&content)
            .map_err(|e| CommsError::Config(format!("Failed to parse config file: {}", e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CommsError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CommsError::storage(parent, e))?;
        }

        std::fs::write(path, content).map_err(|e| CommsError::storage(path, e))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_FILE).filter(|p| !p.is_empty()) {
            self.communications.path = PathBuf::from(path);
        }

        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            match raw.parse() {
                Ok(ms) => self.watcher.poll_interval_ms = ms,
                Err(_) => warn!("Ignoring invalid {}={:?}", ENV_POLL_INTERVAL_MS, raw),
            }
        }

        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            match raw.parse() {
                Ok(retries) => self.communications.max_conflict_retries = retries,
                Err(_) => warn!("Ignoring invalid {}={:?}", ENV_MAX_RETRIES, raw),
            }
        }

        self
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        PathBuf::from("agentcomm.toml")
    }
}
