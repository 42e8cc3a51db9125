//! Lab Panel Pipeline
//!
//! Ingest → classify → store → notify. Parsing, classification and storage
//! run inline on the caller; notifications go through the message bus and are
//! relayed asynchronously.

mod config;
mod ingest;
mod service;

pub use config::{
    ConfigError, LoggingConfig, NotificationConfig, ParserConfig, PipelineConfig, StoreConfig,
    ENV_PREFIX,
};
pub use ingest::{IngestError, IngestReport, Pipeline};
pub use service::Service;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}
