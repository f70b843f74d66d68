//! # Publisher + Bus Client
//!
//! Serializes a `ProcessedTransactionEvent` and publishes it durably to
//! `transactions.{vm_type}.{network}.{subnet}`, retrying transient bus
//! failures with exponential backoff before dropping and counting. The
//! pipeline never blocks on the bus beyond these bounded retries.

mod publisher;

pub use publisher::{EventPublisher, PublishConfig};
