//! Runtime configuration: a typed struct tree loaded once at startup via
//! [`RuntimeConfig::from_env`], with a [`RuntimeConfig::validate`] pass that
//! turns missing or contradictory settings into a fatal startup error —
//! the only class of error this service treats as fatal (SPEC_FULL.md §6.1, §7).

use std::env;
use std::time::Duration;

use ingest_chain_pipeline::{FetchConfig, PipelineConfig};
use ingest_publisher::PublishConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Top-level runtime configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Message bus endpoint (`NATS_URL`).
    pub nats_url: String,
    /// KV store endpoint backing the registry and selector cache (`VALKEY_ADDR`).
    pub valkey_addr: String,
    /// Per-pipeline fetch/decode worker pool size (`DECODER_WORKERS`).
    pub decoder_workers: usize,
    /// Max retries applied to fetch and publish (`MAX_RETRIES`).
    pub max_retries: u32,
    /// Base retry delay; exponential factor 2, capped at 2s (`RETRY_DELAY`).
    pub retry_delay: Duration,
    /// Prometheus scrape port (`METRICS_PORT`).
    pub metrics_port: u16,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let nats_url = require_env("NATS_URL")?;
        let valkey_addr = require_env("VALKEY_ADDR")?;

        let decoder_workers = optional_parse("DECODER_WORKERS", 4usize)?;
        let max_retries = optional_parse("MAX_RETRIES", 3u32)?;
        let retry_delay_ms = optional_parse("RETRY_DELAY_MS", 250u64)?;
        let metrics_port = optional_parse("METRICS_PORT", 9100u16)?;

        let config = Self {
            nats_url,
            valkey_addr,
            decoder_workers,
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            metrics_port,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configuration that would leave the service unable to start:
    /// an empty bus/KV endpoint, or a zero-sized worker pool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nats_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "NATS_URL",
                reason: "must not be empty".to_string(),
            });
        }
        if self.valkey_addr.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "VALKEY_ADDR",
                reason: "must not be empty".to_string(),
            });
        }
        if self.decoder_workers == 0 {
            return Err(ConfigError::Invalid {
                name: "DECODER_WORKERS",
                reason: "must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    /// The Chain Pipeline's per-group channel/worker-pool configuration
    /// implied by this runtime config.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            channel_capacity: 64,
            worker_count: self.decoder_workers,
            fetch: FetchConfig {
                max_retries: self.max_retries,
                base_delay: self.retry_delay,
                max_delay: Duration::from_secs(2),
            },
            publish: self.publish_config(),
            drain_grace: Duration::from_secs(10),
        }
    }

    pub fn publish_config(&self) -> PublishConfig {
        PublishConfig {
            max_retries: self.max_retries,
            base_delay: self.retry_delay,
            max_delay: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("{raw:?} is not a valid value"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RuntimeConfig {
        RuntimeConfig {
            nats_url: "nats://localhost:4222".to_string(),
            valkey_addr: "redis://localhost:6379".to_string(),
            decoder_workers: 4,
            max_retries: 3,
            retry_delay: Duration::from_millis(250),
            metrics_port: 9100,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn empty_bus_url_is_rejected() {
        let mut config = base_config();
        config.nats_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = base_config();
        config.decoder_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn pipeline_config_inherits_retry_settings() {
        let config = base_config();
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.worker_count, 4);
        assert_eq!(pipeline.fetch.max_retries, 3);
        assert_eq!(pipeline.fetch.base_delay, Duration::from_millis(250));
    }
}
