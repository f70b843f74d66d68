//! # Chain Ingest
//!
//! Entry point for the multi-chain blockchain ingestion pipeline. SIGINT
//! or SIGTERM triggers the root cancellation signal; the process exits 0
//! after a clean drain, non-zero on initialization failure (SPEC_FULL.md §6).

use ingest_runtime::{wiring, RuntimeConfig};
use quantum_telemetry::{init_telemetry, TelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let telemetry_config = TelemetryConfig::from_env();
    let _telemetry_guard = init_telemetry(telemetry_config).await?;

    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error, refusing to start");
            std::process::exit(1);
        }
    };

    info!(
        metrics_port = config.metrics_port,
        decoder_workers = config.decoder_workers,
        "chain-ingest starting"
    );

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining pipelines");
        shutdown_cancel.cancel();
    });

    wiring::run(config, cancel).await?;

    info!("chain-ingest exited cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
