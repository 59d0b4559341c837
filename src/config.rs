use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ArchiveError, Result};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Message store location and pool settings
    pub store: StoreConfig,
    /// Auto-sync policy
    pub sync: SyncConfig,
    /// Log level, format and destination
    pub logging: LoggingConfig,
}

/// Message store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the messages database file
    pub path: String,
    /// How long a caller waits for the single write connection
    pub connection_timeout_secs: u64,
}

/// When and how long to sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Opt-out: never auto-sync when set
    pub disabled: bool,
    /// Age after which the local copy is considered stale
    pub staleness_threshold_secs: u64,
    /// Bound on the auto-sync wait for history-sync completion
    pub wait_timeout_secs: u64,
    /// Bound on an explicitly requested sync
    pub manual_timeout_secs: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info`
    pub level: String,
    /// Append logs to this file instead of stdout
    pub file_path: Option<String>,
    /// `json` or `text`
    pub format: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/messages.db".to_string(),
            connection_timeout_secs: 30,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            staleness_threshold_secs: 24 * 60 * 60,
            wait_timeout_secs: 30,
            manual_timeout_secs: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            format: "text".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Database path
    #[must_use]
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    /// Pool checkout timeout
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

impl SyncConfig {
    /// Staleness threshold as a duration
    #[must_use]
    pub const fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    /// Auto-sync wait bound as a duration
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Explicit sync wait bound as a duration
    #[must_use]
    pub const fn manual_timeout(&self) -> Duration {
        Duration::from_secs(self.manual_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        let config = Config::builder()
            // Start with default values
            .set_default("store.path", defaults.store.path)?
            .set_default("store.connection_timeout_secs", defaults.store.connection_timeout_secs)?
            .set_default("sync.disabled", defaults.sync.disabled)?
            .set_default("sync.staleness_threshold_secs", defaults.sync.staleness_threshold_secs)?
            .set_default("sync.wait_timeout_secs", defaults.sync.wait_timeout_secs)?
            .set_default("sync.manual_timeout_secs", defaults.sync.manual_timeout_secs)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix
            .add_source(Environment::with_prefix("CHAT_ARCHIVE").separator("__"))
            .build()?;

        let app_config: Self = config.try_deserialize()?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.store.path.trim().is_empty() {
            return Err(ArchiveError::Configuration("store.path must not be empty".to_string()));
        }
        if self.store.connection_timeout_secs == 0 {
            return Err(ArchiveError::Configuration(
                "store.connection_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.sync.staleness_threshold_secs == 0 {
            return Err(ArchiveError::Configuration(
                "sync.staleness_threshold_secs must be greater than 0".to_string(),
            ));
        }
        if self.sync.wait_timeout_secs == 0 || self.sync.manual_timeout_secs == 0 {
            return Err(ArchiveError::Configuration("sync timeouts must be greater than 0".to_string()));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ArchiveError::Configuration(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ArchiveError::Configuration(format!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format, valid_formats
            )));
        }

        Ok(())
    }
}
