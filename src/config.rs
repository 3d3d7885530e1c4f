//! Configuration loading.
//!
//! [`ReqflowConfig`] is assembled with `figment`. Precedence, lowest to
//! highest:
//!
//! 1. Programmatic defaults
//! 2. `reqflow.yaml`
//! 3. `reqflow.local.yaml` (optional local overrides)
//! 4. Environment variables prefixed `REQFLOW_`, nested with `__`
//!    (e.g. `REQFLOW_STORE__BACKEND=sqlite`)

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::event::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::{ReqflowError, Result};

/// Primary configuration file.
pub const CONFIG_FILE: &str = "reqflow.yaml";
/// Optional local override file.
pub const LOCAL_CONFIG_FILE: &str = "reqflow.local.yaml";
/// Environment variable prefix.
pub const ENV_PREFIX: &str = "REQFLOW_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The sqlite backend was selected without a database path.
    #[error("Database path cannot be empty when the sqlite backend is selected")]
    EmptyDatabasePath,

    /// The event channel cannot hold any events.
    #[error("Invalid channel_capacity: {0}. Must be at least 1")]
    InvalidChannelCapacity(usize),

    /// The log level is not one tracing understands.
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

impl From<ConfigError> for ReqflowError {
    fn from(e: ConfigError) -> Self {
        ReqflowError::Config(e.to_string())
    }
}

/// Which store backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process, lost on exit.
    #[default]
    Memory,
    /// SQLite file; requires the `sqlite` feature.
    Sqlite,
}

/// Store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend to open.
    pub backend: StoreBackend,
    /// Database file for the sqlite backend.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: "reqflow.db".to_string(),
        }
    }
}

/// Event channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity per subscriber.
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable multi-line output.
    #[default]
    Pretty,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level; `RUST_LOG` overrides it.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReqflowConfig {
    /// Store settings.
    pub store: StoreConfig,
    /// Event channel settings.
    pub events: EventsConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl ReqflowConfig {
    /// Loads configuration from defaults, the config files in the current
    /// directory, and the environment, then validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::Config`] if a source cannot be parsed or the
    /// result fails validation.
    pub fn load() -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(CONFIG_FILE))
            .merge(Yaml::file(LOCAL_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ReqflowError::Config(format!("failed to extract configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from defaults and one YAML file, then validates
    /// it. The environment is not consulted.
    ///
    /// # Errors
    ///
    /// Returns [`ReqflowError::Config`] if the file cannot be parsed or the
    /// result fails validation.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path))
            .extract()
            .map_err(|e| {
                ReqflowError::Config(format!("failed to load config from {}: {e}", path.display()))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but cannot work.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.store.backend == StoreBackend::Sqlite && self.store.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity(0));
        }

        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }
}
