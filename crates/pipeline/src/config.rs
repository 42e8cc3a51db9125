//! Pipeline Configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then
//! `LABWATCH__SECTION__KEY` environment variables.

use message_bus::{BrokerConfig, MqttConfig};
use relay::{RelayConfig, DEFAULT_BROADCAST_CAPACITY};
use result_store::DEFAULT_CAPACITY;
use risk_classifier::RiskThresholds;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "LABWATCH";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Max level: trace, debug, info, warn, error (default: info)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Parser limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Largest accepted payload (default: 1 MiB)
    pub max_payload_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: lab_protocol::DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Result store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum retained panels (default: 10 000)
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Notification persistence and broadcast settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notifications kept by the in-memory repository (default: 10 000)
    pub retention: usize,
    /// Buffered messages per broadcast channel (default: 256)
    pub broadcast_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            retention: storage::DEFAULT_RETENTION,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub logging: LoggingConfig,
    pub parser: ParserConfig,
    pub store: StoreConfig,
    pub thresholds: RiskThresholds,
    pub broker: BrokerConfig,
    pub relay: RelayConfig,
    pub notifications: NotificationConfig,
    pub mqtt: MqttConfig,
}

impl PipelineConfig {
    /// Load from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        Self::finish(builder)
    }

    /// Load from TOML text plus environment overrides
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml));
        Self::finish(builder)
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
