//! # Head Events
//!
//! One block header notification, produced by the Head Source and consumed
//! by the Block Fetcher. Short-lived; never persisted.

use serde::{Deserialize, Serialize};

/// A newly observed block header from a node's `newHeads` subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadEvent {
    pub block_hash: String,
    pub parent_hash: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub source_node_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_event_round_trips_through_json() {
        let h = HeadEvent {
            block_hash: "0xaa".into(),
            parent_hash: "0xbb".into(),
            block_number: 42,
            block_timestamp: 1_700_000_000,
            source_node_id: "node-1".into(),
        };
        let json = serde_json::to_string(&h).unwrap();
        let back: HeadEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
