//! # Quantum Telemetry
//!
//! Structured logging, distributed tracing, and Prometheus metrics for the
//! ingestion pipeline.
//!
//! ## Components
//!
//! - Structured logging via `tracing`, optionally JSON-formatted for log
//!   aggregation.
//! - Distributed tracing via OpenTelemetry, exported over OTLP.
//! - Prometheus metrics exposed on `METRICS_PORT` (§6 of SPEC_FULL.md).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quantum_telemetry::{TelemetryConfig, init_telemetry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(config).await.expect("failed to init telemetry");
//!     // application code runs here; traces, logs and metrics are collected
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://localhost:4317` | OTLP trace collector endpoint |
//! | `OTEL_SERVICE_NAME` | `chain-ingest` | Service name in traces |
//! | `INGEST_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `INGEST_JSON_LOGS` | `false` outside containers | Emit JSON logs instead of ANSI |
//! | `METRICS_PORT` | `9100` | Prometheus scrape endpoint |

#![warn(missing_docs)]
#![allow(missing_docs)] // TODO: fill in doc comments for the metric constants individually

mod config;
mod context;
mod logging;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use context::{PropagatedContext, TraceContext};
pub use logging::StructuredLogger;
pub use metrics::{
    register_metrics, MetricsHandle, ACTIVE_PIPELINES, BLOCKS_FETCHED, EVENTS_PUBLISHED,
    FETCH_DROPPED, FETCH_DURATION, FETCH_RETRIES, GROUP_ACTIVE_NODE, GROUP_NODE_SWITCHES,
    HEADS_RECEIVED, HEAD_STREAM_INTERRUPTIONS, INGEST_ERRORS, PUBLISH_DURATION, PUBLISH_FAILURES,
    PUBLISH_RETRIES, REGISTRY_RECONNECTS, SELECTOR_CACHE_LOOKUPS, TRANSACTIONS_DECODED,
};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Loki logger: {0}")]
    LokiInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize the complete LGTM telemetry stack.
///
/// Returns a guard that must be held for the lifetime of the application.
/// When dropped, it flushes all pending traces and logs.
///
/// # Example
///
/// ```rust,ignore
/// let config = TelemetryConfig::from_env();
/// let _guard = init_telemetry(config).await?;
///
/// // Application runs here...
/// // Guard is dropped on exit, flushing telemetry
/// ```
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Initialize metrics first (synchronous)
    let metrics_handle = register_metrics()?;

    // Initialize tracing (OpenTelemetry -> Tempo)
    let tracing_guard = tracing_setup::init_tracing(&config).await?;

    // Initialize structured logging (-> Loki)
    let _logging_guard = logging::init_logging(&config)?;

    Ok(TelemetryGuard {
        _tracing: tracing_guard,
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
        // TracingGuard handles OpenTelemetry shutdown
        // MetricsHandle handles Prometheus shutdown
    }
}

/// Convenience macro for creating a span with subsystem context.
///
/// # Example
///
/// ```rust,ignore
/// use quantum_telemetry::subsystem_span;
///
/// fn validate_block() {
///     let _span = subsystem_span!("validate_block", subsystem = "consensus", block_height = 12345);
///     // ... validation logic
/// }
/// ```
#[macro_export]
macro_rules! subsystem_span {
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

/// Convenience macro for recording a metric with a value.
#[macro_export]
macro_rules! metric_observe {
    ($metric:expr, $value:expr) => {
        $metric.observe($value)
    };
    ($metric:expr, $labels:expr, $value:expr) => {
        $metric.with_label_values($labels).observe($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "chain-ingest");
    }
}
