//! # In-process event bus
//!
//! Multi-producer, multi-consumer fan-out for `PipelineEvent`, backed by
//! `tokio::sync::broadcast`. Shared across all Chain Pipelines in a
//! process; the Selector Cache's L1 map and the NATS/KV adapters in this
//! crate are the only other process-wide shared state.

use crate::events::{EventFilter, PipelineEvent};
use crate::subscriber::{EventStream, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default capacity for the broadcast channel backing the in-process bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event; returns the number of subscribers that received it.
    async fn publish(&self, event: PipelineEvent) -> usize;

    fn events_published(&self) -> u64;
}

/// In-memory implementation of the in-process bus.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<PipelineEvent>,
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,
    events_published: AtomicU64,
    capacity: usize,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let receiver = self.sender.subscribe();
        let topic_key = format!("{:?}", filter.topics);
        if let Ok(mut subs) = self.subscriptions.write() {
            *subs.entry(topic_key.clone()).or_insert(0) += 1;
        }
        debug!(topics = ?filter.topics, "new bus subscription");
        Subscription::new(receiver, filter, self.subscriptions.clone(), topic_key)
    }

    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        EventStream::new(self.subscribe(filter))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: PipelineEvent) -> usize {
        let topic = event.topic();
        self.events_published.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(topic = ?topic, receivers, "event published");
                receivers
            }
            Err(_) => {
                warn!(topic = ?topic, "event dropped, no subscribers");
                0
            }
        }
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTopic;
    use shared_types::GroupKey;

    fn reselect_event() -> PipelineEvent {
        PipelineEvent::ReselectRequest {
            group: GroupKey::new("ethereum", "mainnet", "evm"),
            node_id: "node-1".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_returns_zero() {
        let bus = InMemoryEventBus::new();
        let receivers = bus.publish(reselect_event()).await;
        assert_eq!(receivers, 0);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = InMemoryEventBus::new();
        let _sub1 = bus.subscribe(EventFilter::all());
        let _sub2 = bus.subscribe(EventFilter::all());
        let _sub3 = bus.subscribe(EventFilter::topics(vec![EventTopic::Reselect]));

        let receivers = bus.publish(reselect_event()).await;
        assert_eq!(receivers, 3);
        assert_eq!(bus.subscriber_count(), 3);
    }

    #[test]
    fn default_bus_has_default_capacity() {
        let bus = InMemoryEventBus::default();
        assert_eq!(bus.capacity(), DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.events_published(), 0);
    }
}
