//! Labwatch - Main Entry Point
//!
//! Usage: `labwatch [PAYLOAD.json]...`
//!
//! Configuration is read from the file named by `LABWATCH_CONFIG` (optional)
//! and `LABWATCH__SECTION__KEY` environment variables.

use anyhow::Context;
use pipeline::{init_logging, PipelineConfig, Service};
use publisher::InMemorySubjectDirectory;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("LABWATCH_CONFIG").map(PathBuf::from);
    let config = PipelineConfig::load(config_path.as_deref())
        .context("loading configuration")?;

    init_logging(&config.logging).context("installing tracing subscriber")?;

    info!("=== Labwatch v{} ===", env!("CARGO_PKG_VERSION"));

    let service = Service::start(&config, Arc::new(InMemorySubjectDirectory::new()));

    for path in std::env::args_os().skip(1).map(PathBuf::from) {
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        match service.pipeline().ingest(&raw) {
            Ok(report) => info!("{}: {}", path.display(), serde_json::to_string(&report)?),
            Err(e) => error!("{}: {}", path.display(), e),
        }
    }

    let drain_timeout = Duration::from_millis(config.relay.shutdown_timeout_ms);
    service.drain(drain_timeout).await;

    let stats = service.pipeline().store().stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if !service.shutdown().await {
        error!("Relay did not stop cleanly");
    }

    Ok(())
}
