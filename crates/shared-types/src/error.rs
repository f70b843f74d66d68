//! # Error Taxonomy
//!
//! One enum, one variant per failure kind named in the error-handling
//! design, each carrying enough context (group key, node id, tx hash)
//! to be logged usefully without a caller re-deriving it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("head stream interrupted for node {node_id}: {reason}")]
    HeadStreamInterrupted { node_id: String, reason: String },

    #[error("transient block fetch failure for node {node_id}, block {block_hash}: {reason}")]
    BlockFetchTransient {
        node_id: String,
        block_hash: String,
        reason: String,
    },

    #[error("permanent block fetch failure for node {node_id}, block {block_hash}: {reason}")]
    BlockFetchPermanent {
        node_id: String,
        block_hash: String,
        reason: String,
    },

    #[error("malformed block or transaction data from node {node_id}: {reason}")]
    DecoderMalformed { node_id: String, reason: String },

    #[error("no selector entry found for {selector} (address {address:?})")]
    SelectorNotFound {
        selector: String,
        address: Option<String>,
    },

    #[error("cache backend error: {0}")]
    CacheBackendError(String),

    #[error("publish failed for tx {tx_hash} on subject {subject}: {reason}")]
    PublishFailed {
        tx_hash: String,
        subject: String,
        reason: String,
    },

    #[error("node {node_id} failed fatally: {reason}")]
    NodeFatal { node_id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Whether this error reflects a condition that is expected to clear on
    /// its own (retryable / self-healing) rather than one that needs a
    /// node switch or operator attention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::BlockFetchTransient { .. }
                | IngestError::RegistryUnavailable(_)
                | IngestError::CacheBackendError(_)
                | IngestError::PublishFailed { .. }
        )
    }
}
