//! Retry/backoff wrapper over a `BusClient` for durable event publish.

use std::sync::Arc;
use std::time::Duration;

use quantum_telemetry::{time_histogram, EVENTS_PUBLISHED, PUBLISH_DURATION, PUBLISH_FAILURES, PUBLISH_RETRIES};
use shared_bus::BusClient;
use shared_types::ProcessedTransactionEvent;
use tracing::{error, warn};

/// Retry schedule and ack timeout for durable publish.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub ack_timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// Publishes `ProcessedTransactionEvent`s to the message bus, retrying
/// transient failures and dropping (with a logged error and a counter
/// increment) once retries are exhausted. Never propagates a failure back
/// to the calling pipeline stage — the bus is not allowed to stall ingestion.
pub struct EventPublisher<C: BusClient> {
    bus: Arc<C>,
    config: PublishConfig,
}

impl<C: BusClient> EventPublisher<C> {
    pub fn new(bus: Arc<C>, config: PublishConfig) -> Self {
        Self { bus, config }
    }

    pub async fn publish(&self, event: &ProcessedTransactionEvent) {
        let subject = event.group.subject();
        let labels = [
            event.group.network.as_str(),
            event.group.subnet.as_str(),
            event.group.vm_type.as_str(),
        ];

        let payload = match serde_json::to_vec(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(tx_hash = %event.event_id, error = %e, "failed to serialize event, dropping");
                PUBLISH_FAILURES.with_label_values(&labels).inc();
                return;
            }
        };

        let _timer = time_histogram!(PUBLISH_DURATION);
        let mut attempt = 0u32;
        loop {
            match self
                .bus
                .publish_durable(&subject, payload.clone(), self.config.ack_timeout)
                .await
            {
                Ok(()) => {
                    EVENTS_PUBLISHED.with_label_values(&labels).inc();
                    return;
                }
                Err(e) => {
                    if attempt >= self.config.max_retries {
                        error!(
                            tx_hash = %event.event_id,
                            subject = %subject,
                            error = %e,
                            "publish failed after retries exhausted, dropping event"
                        );
                        PUBLISH_FAILURES.with_label_values(&labels).inc();
                        return;
                    }
                    warn!(tx_hash = %event.event_id, subject = %subject, attempt, error = %e, "publish failed, retrying");
                    PUBLISH_RETRIES.with_label_values(&labels).inc();
                    let delay = backoff_delay(attempt, self.config.base_delay, self.config.max_delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    std::cmp::min(base.saturating_mul(1u32 << attempt.min(16)), max)
}
