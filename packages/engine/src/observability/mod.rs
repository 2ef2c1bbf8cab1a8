// packages/engine/src/observability/mod.rs
//! Tracing and metrics initialisation
//!
//! Metric names live here so that producers and dashboards agree on them.

use crate::utils::config::{LogFormat, LoggingConfig, MetricsConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const PHASES_RECEIVED: &str = "netscope_phases_received_total";
pub const REQUESTS_FILTERED: &str = "netscope_requests_filtered_total";
pub const RECORDS_FINALIZED: &str = "netscope_records_finalized_total";
pub const ORPHANS_SWEPT: &str = "netscope_orphans_swept_total";
pub const RECORDS_PERSISTED: &str = "netscope_records_persisted_total";
pub const PERSIST_FAILURES: &str = "netscope_persist_failures_total";
pub const EXPORTS_RENDERED: &str = "netscope_exports_rendered_total";
pub const IN_FLIGHT: &str = "netscope_in_flight";
pub const QUEUE_DEPTH: &str = "netscope_writer_queue_depth";

/// Install the global tracing subscriber
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| EngineError::ConfigError(format!("Invalid log level: {}", e)))?;

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .pretty()
            .try_init(),
    };

    result.map_err(|e| EngineError::ConfigError(format!("Failed to install subscriber: {}", e)))
}

/// Install the Prometheus recorder when metrics are enabled
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| EngineError::ConfigError(format!("Invalid metrics address: {}", e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::ConfigError(format!("Failed to install metrics exporter: {}", e)))?;

    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}
