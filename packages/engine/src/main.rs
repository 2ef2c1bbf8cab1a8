// packages/engine/src/main.rs
//! Netscope Engine
//!
//! Daemon that accepts request-lifecycle events over HTTP, correlates them
//! into records, persists them, and serves exports.

use anyhow::{Context, Result};
use netscope_engine::api::HttpServer;
use netscope_engine::monitor::Monitor;
use netscope_engine::observability::{init_metrics, init_tracing};
use netscope_engine::utils::config::EngineConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; logging settings live in it
    let config = EngineConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    info!("Starting Netscope Engine v{}", netscope_engine::VERSION);
    info!("Configuration loaded: {:?}", config);

    let addr = config.server.socket_addr()?;
    let monitor = Arc::new(Monitor::open(config).await.context("Failed to open monitor")?);

    let cancel = CancellationToken::new();
    let background = monitor.spawn_background(cancel.clone());

    info!("Starting HTTP API on {}", addr);
    let server = Arc::new(HttpServer::new(addr, Arc::clone(&monitor)));
    let mut serving = tokio::spawn(server.serve(cancel.clone()));

    // Graceful shutdown handler; a server that exits on its own also ends the run
    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to install CTRL+C signal handler")?;
            info!("Received shutdown signal, cleaning up...");
            None
        }
        result = &mut serving => Some(result),
    };
    cancel.cancel();

    let served = match finished {
        Some(result) => result,
        None => serving.await,
    };
    match served {
        Ok(Ok(())) => info!("Server stopped gracefully"),
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => error!("Server task failed: {}", e),
    }
    for handle in background {
        if let Err(e) = handle.await {
            error!("Background task failed: {}", e);
        }
    }

    monitor.shutdown().await?;
    Ok(())
}
