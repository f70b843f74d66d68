//! # Bus Client SPI
//!
//! The durable, acknowledged publish interface the Publisher (and Head
//! Source, for lightweight head-event fan-out) depend on. `NatsBusClient`
//! is the production adapter; tests exercise the trait against fakes.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusClientError {
    #[error("failed to connect to message bus at {0}")]
    Connect(String),

    #[error("publish to subject {subject} failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("acknowledgement for subject {subject} timed out after {timeout_ms}ms")]
    AckTimeout { subject: String, timeout_ms: u64 },
}

/// Durable, acknowledged publish to the message bus.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Publish `payload` to `subject`, blocking until the bus acknowledges
    /// receipt or `ack_timeout` elapses.
    async fn publish_durable(
        &self,
        subject: &str,
        payload: Vec<u8>,
        ack_timeout: Duration,
    ) -> Result<(), BusClientError>;
}

/// NATS JetStream-backed adapter.
pub struct NatsBusClient {
    jetstream: async_nats::jetstream::Context,
}

impl NatsBusClient {
    pub async fn connect(url: &str) -> Result<Self, BusClientError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusClientError::Connect(e.to_string()))?;
        let jetstream = async_nats::jetstream::new(client);
        Ok(Self { jetstream })
    }

    pub fn from_jetstream(jetstream: async_nats::jetstream::Context) -> Self {
        Self { jetstream }
    }
}

#[async_trait]
impl BusClient for NatsBusClient {
    async fn publish_durable(
        &self,
        subject: &str,
        payload: Vec<u8>,
        ack_timeout: Duration,
    ) -> Result<(), BusClientError> {
        let ack_future = self
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusClientError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        match tokio::time::timeout(ack_timeout, ack_future).await {
            Ok(Ok(_ack)) => Ok(()),
            Ok(Err(e)) => Err(BusClientError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            }),
            Err(_elapsed) => Err(BusClientError::AckTimeout {
                subject: subject.to_string(),
                timeout_ms: ack_timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(all(test, feature = "test-util"))]
mod tests {
    use super::*;
    use crate::fakes::FakeBusClient;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn fake_bus_client_counts_successful_publishes() {
        let client = FakeBusClient::new();
        client
            .publish_durable("transactions.evm.ethereum.mainnet", b"{}".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(client.published.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fake_bus_client_fails_configured_subjects() {
        let mut client = FakeBusClient::new();
        client.fail_subjects.push("transactions.evm.ethereum.mainnet".into());
        let result = client
            .publish_durable("transactions.evm.ethereum.mainnet", b"{}".to_vec(), Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }
}
