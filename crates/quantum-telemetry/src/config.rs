//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for the observability stack (tracing, logging, metrics).
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for traces and logs.
    pub service_name: String,

    /// OpenTelemetry OTLP endpoint for trace export.
    pub otlp_endpoint: String,

    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,

    /// Whether to enable console output (for development).
    pub console_output: bool,

    /// Whether to emit JSON-formatted logs instead of human-readable ANSI.
    pub json_logs: bool,

    /// Prometheus metrics port.
    pub metrics_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "chain-ingest".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            metrics_port: 9100,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: Service name (default: chain-ingest)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: Trace collector endpoint (default: http://localhost:4317)
    /// - `INGEST_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `INGEST_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `INGEST_JSON_LOGS`: Emit JSON logs instead of ANSI (default: false in dev, true in containers)
    /// - `METRICS_PORT`: Prometheus scrape endpoint (default: 9100)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "chain-ingest".to_string()),

            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),

            log_level: env::var("INGEST_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("INGEST_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("INGEST_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            metrics_port: env::var("METRICS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "chain-ingest");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.metrics_port, 9100);
    }
}
