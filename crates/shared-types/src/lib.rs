//! # Shared Types
//!
//! Domain entities shared across the ingestion pipeline crates.
//!
//! ## Clusters
//!
//! - **Registry**: `NodeConfig`, `NodeStatus`, `GroupKey`
//! - **Chain data**: `HeadEvent`, `Transaction`, `DecodedCall`, `ParamValue`
//! - **Output**: `ProcessedTransactionEvent`
//! - **ABI**: `SelectorEntry`, `SelectorParam`
//! - **Errors**: `IngestError`

pub mod error;
pub mod event;
pub mod registry;
pub mod selector;
pub mod transaction;

pub use error::IngestError;
pub use event::HeadEvent;
pub use registry::{GroupKey, NodeConfig, NodeStatus};
pub use selector::{SelectorEntry, SelectorParam};
pub use transaction::{DecodedCall, ParamValue, ProcessedTransactionEvent, Transaction};
