//! # Shared Bus
//!
//! Two things live here: the in-process choreography bus used for
//! head-event fan-out and the reverse-direction Supervisor/Chain Pipeline
//! command channel, and the `BusClient`/`KvStore` SPI traits that the
//! rest of the core depends on to reach the outside world (the message
//! bus and the registry/selector KV store) without naming a concrete
//! client type.

pub mod bus_client;
pub mod events;
#[cfg(feature = "test-util")]
pub mod fakes;
pub mod kv_store;
pub mod publisher;
pub mod subscriber;

pub use bus_client::{BusClient, BusClientError, NatsBusClient};
pub use events::{EventFilter, EventTopic, PipelineEvent};
pub use kv_store::{KvStore, KvStoreError, RedisKvStore, WatchEvent, WatchOp};
pub use publisher::{EventPublisher, InMemoryEventBus, DEFAULT_CHANNEL_CAPACITY};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channel_capacity_is_1000() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1000);
    }
}
