//! Global daemon configuration.
//!
//! Loads daemon-wide settings from `~/.vigil/daemon.toml`.
//! These settings are separate from per-project `vigil.toml` descriptors.
//!
//! # Example Configuration
//!
//! ```toml
//! [daemon]
//! port = 7070
//!
//! [logging]
//! format = "json"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::constants;

/// Global daemon configuration loaded from `~/.vigil/daemon.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Daemon server settings.
    pub daemon: DaemonSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Daemon server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Port for the daemon HTTP API.
    pub port: u16,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Output format: "pretty", "json", or "compact".
    pub format: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_DAEMON_PORT,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load daemon configuration from `~/.vigil/daemon.toml`.
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid, returns an error.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::debug!(
                path = %config_path.display(),
                "Daemon config not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path).with_context(|| {
            format!(
                "Failed to read daemon config from {}",
                config_path.display()
            )
        })?;

        let config: DaemonConfig = toml::from_str(&content).with_context(|| {
            format!(
                "Failed to parse daemon config from {}",
                config_path.display()
            )
        })?;

        tracing::info!(
            path = %config_path.display(),
            port = config.daemon.port,
            log_format = %config.logging.format,
            "Loaded daemon configuration"
        );

        Ok(config)
    }

    /// Get the path to the daemon configuration file.
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".vigil").join("daemon.toml"))
    }
}

/// Default state database path: `~/.vigil/state.redb`.
pub fn state_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Failed to get home directory")?;
    Ok(home.join(".vigil").join("state.redb"))
}

/// Path of the daemon PID file: `~/.vigil/daemon.pid`.
pub fn daemon_pid_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Failed to get home directory")?;
    Ok(home.join(".vigil").join("daemon.pid"))
}
