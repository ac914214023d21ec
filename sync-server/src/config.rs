//! Configuration loading for sync-server.
//!
//! Configuration is loaded from a TOML file (default: `diffsync.toml`).
//! Every section and field may be omitted.

use serde::Deserialize;
use std::path::PathBuf;
use sync_core::PatchOptions;

/// Root configuration for sync-server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Diff/patch engine tuning.
    pub patch: PatchOptions,
    /// Patch audit configuration.
    pub audit: AuditConfig,
    /// In-process channel configuration.
    pub channel: ChannelConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Patch audit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Record a summary of every applied client patch (default: true).
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
}

/// In-process channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Envelopes buffered per direction before senders wait (default: 256).
    #[serde(default = "default_channel_buffer")]
    pub buffer: usize,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("diffsync.db")
}

fn default_audit_enabled() -> bool {
    true
}

fn default_channel_buffer() -> usize {
    256
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            buffer: default_channel_buffer(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
