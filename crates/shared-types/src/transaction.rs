//! # Transaction, DecodedCall & the published event envelope
//!
//! All numeric fields that cross the wire are carried as hex or decimal
//! strings to preserve precision past `u64`/`f64` boundaries — see
//! SPEC_FULL.md §3.1.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::registry::GroupKey;

/// Canonical per-transaction record, pre-decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    /// `None` for contract-creation transactions.
    pub to: Option<String>,
    /// Decimal string (wei-denominated).
    pub value: String,
    /// `0x`-prefixed hex calldata; `"0x"` for a plain transfer.
    pub input: String,
    /// `0x`-prefixed hex.
    pub gas: String,
    /// `0x`-prefixed hex.
    pub gas_price: String,
    /// `0x`-prefixed hex.
    pub nonce: String,
    pub block_hash: String,
    pub block_number: u64,
    pub transaction_index: u64,
    /// EIP-2718 transaction type, if present.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<String>,
}

impl Transaction {
    /// `true` if `input` is empty or the bare `"0x"` prefix.
    pub fn has_empty_input(&self) -> bool {
        self.input.is_empty() || self.input == "0x"
    }

    /// The 4-byte function selector (`0x` + 8 hex chars), if `input` is long enough.
    pub fn selector(&self) -> Option<String> {
        if self.input.len() >= 10 {
            Some(self.input[..10].to_lowercase())
        } else {
            None
        }
    }
}

/// A single decoded ABI parameter value, tagged so consumers can tell
/// addresses from byte strings from big integers without guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    /// `0x`-prefixed, lowercase.
    Address(String),
    /// Base-10 decimal string; may be arbitrarily large.
    Uint(String),
    /// Base-10 decimal string; may be negative.
    Int(String),
    Bool(bool),
    /// `0x`-prefixed hex.
    Bytes(String),
    String(String),
    Array(Vec<ParamValue>),
    Tuple(Vec<ParamValue>),
}

/// ABI-decoding enrichment for a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedCall {
    pub function: String,
    pub params: BTreeMap<String, ParamValue>,
}

impl DecodedCall {
    /// The synthetic transfer enrichment for `input == "0x"` transactions
    /// (invariant 4, SPEC_FULL.md §8).
    pub fn synthetic_transfer(from: &str, to: &str, value: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert("from".to_string(), ParamValue::Address(from.to_lowercase()));
        params.insert("to".to_string(), ParamValue::Address(to.to_lowercase()));
        params.insert("value".to_string(), ParamValue::Uint(value.to_string()));
        Self {
            function: "transfer".to_string(),
            params,
        }
    }

    /// The synthetic contract-creation enrichment for `to == null` transactions
    /// (invariant 5, SPEC_FULL.md §8).
    pub fn contract_creation(from: &str, value: &str, init_code: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert("from".to_string(), ParamValue::Address(from.to_lowercase()));
        params.insert("value".to_string(), ParamValue::Uint(value.to_string()));
        params.insert("init_code".to_string(), ParamValue::Bytes(init_code.to_string()));
        Self {
            function: "contract_creation".to_string(),
            params,
        }
    }
}

/// The published artifact: a transaction in its block context, optionally
/// enriched with a decoded call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTransactionEvent {
    #[serde(flatten)]
    pub group: GroupKey,
    pub block_hash: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction: Transaction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_call: Option<DecodedCall>,
    pub event_id: String,
}

impl ProcessedTransactionEvent {
    pub fn new(
        group: GroupKey,
        block_hash: String,
        block_number: u64,
        block_timestamp: u64,
        transaction: Transaction,
        decoded_call: Option<DecodedCall>,
    ) -> Self {
        let event_id = transaction.hash.clone();
        Self {
            group,
            block_hash,
            block_number,
            block_timestamp,
            transaction,
            decoded_call,
            event_id,
        }
    }
}
