//! Transaction classification and selector-cache-backed enrichment.

use std::sync::Arc;

use ingest_selector_cache::{SelectorCache, SelectorLookup};
use quantum_telemetry::TRANSACTIONS_DECODED;
use shared_types::{DecodedCall, Transaction};
use tracing::debug;

use crate::abi::decode_params;

/// Classifies and (where possible) enriches a transaction with a
/// `DecodedCall`, consulting the Selector Cache for function-call inputs.
pub struct TransactionDecoder {
    cache: Arc<SelectorCache>,
}

impl TransactionDecoder {
    pub fn new(cache: Arc<SelectorCache>) -> Self {
        Self { cache }
    }

    /// Decode `tx` in the context of `chain`. Never fails: a decode failure
    /// or full selector miss degrades to `None`, never to dropping the
    /// transaction itself.
    pub async fn decode(&self, chain: &str, tx: &Transaction) -> Option<DecodedCall> {
        if tx.has_empty_input() {
            if let Some(to) = &tx.to {
                TRANSACTIONS_DECODED.with_label_values(&["transfer"]).inc();
                return Some(DecodedCall::synthetic_transfer(&tx.from, to, &tx.value));
            }
            // Empty input and no recipient: falls through to contract_creation below.
        }

        if tx.to.is_none() {
            TRANSACTIONS_DECODED.with_label_values(&["contract_creation"]).inc();
            return Some(DecodedCall::contract_creation(&tx.from, &tx.value, &tx.input));
        }

        let Some(selector) = tx.selector() else {
            TRANSACTIONS_DECODED.with_label_values(&["undecoded"]).inc();
            return None;
        };

        let lookup = self.cache.lookup_global(chain, &selector).await;
        let lookup = match lookup {
            SelectorLookup::Miss => {
                if let Some(address) = &tx.to {
                    self.cache.lookup_scoped(chain, address, &selector).await
                } else {
                    SelectorLookup::Miss
                }
            }
            hit => hit,
        };

        let Some(entry) = lookup.entry() else {
            debug!(%selector, "selector cache miss, publishing without decoded call");
            TRANSACTIONS_DECODED.with_label_values(&["undecoded"]).inc();
            return None;
        };

        let calldata = match hex::decode(tx.input.trim_start_matches("0x").get(8..).unwrap_or("")) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(%selector, error = %e, "malformed hex calldata");
                TRANSACTIONS_DECODED.with_label_values(&["undecoded"]).inc();
                return None;
            }
        };

        match decode_params(&entry, &calldata) {
            Ok(params) => {
                TRANSACTIONS_DECODED.with_label_values(&["function_call"]).inc();
                Some(DecodedCall {
                    function: entry.name.clone(),
                    params,
                })
            }
            Err(e) => {
                debug!(%selector, error = %e, "calldata failed to decode against selector entry");
                TRANSACTIONS_DECODED.with_label_values(&["undecoded"]).inc();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_dyn_abi::DynSolValue;
    use shared_bus::fakes::FakeKvStore;
    use shared_types::{SelectorEntry, SelectorParam};

    fn tx(input: &str, to: Option<&str>) -> Transaction {
        Transaction {
            hash: "0xaa".into(),
            from: "0x01".into(),
            to: to.map(str::to_string),
            value: "1000".into(),
            input: input.into(),
            gas: "0x5208".into(),
            gas_price: "0x3b9aca00".into(),
            nonce: "0x1".into(),
            block_hash: "0xblock".into(),
            block_number: 10,
            transaction_index: 0,
            tx_type: None,
        }
    }

    fn decoder() -> TransactionDecoder {
        let kv = Arc::new(FakeKvStore::new());
        TransactionDecoder::new(Arc::new(SelectorCache::new(kv)))
    }

    #[tokio::test]
    async fn empty_input_yields_transfer() {
        let decoder = decoder();
        let call = decoder.decode("ethereum", &tx("0x", Some("0x02"))).await.unwrap();
        assert_eq!(call.function, "transfer");
    }

    #[tokio::test]
    async fn missing_to_yields_contract_creation() {
        let decoder = decoder();
        let call = decoder
            .decode("ethereum", &tx("0x6001600101", None))
            .await
            .unwrap();
        assert_eq!(call.function, "contract_creation");
    }

    #[tokio::test]
    async fn unknown_selector_yields_no_decoded_call() {
        let decoder = decoder();
        let call = decoder
            .decode("ethereum", &tx("0xdeadbeef00000000000000000000000000000000000000", Some("0x02")))
            .await;
        assert!(call.is_none());
    }

    #[tokio::test]
    async fn known_selector_decodes_function_call() {
        let kv = Arc::new(FakeKvStore::new());
        let entry = SelectorEntry {
            selector: "0xa9059cbb".into(),
            name: "transfer".into(),
            inputs: vec![
                SelectorParam { name: "_to".into(), ty: "address".into() },
                SelectorParam { name: "_value".into(), ty: "uint256".into() },
            ],
        };
        kv.seed(
            &SelectorEntry::global_kv_key("ethereum", "0xa9059cbb"),
            &serde_json::to_string(&entry).unwrap(),
        );
        let decoder = TransactionDecoder::new(Arc::new(SelectorCache::new(kv)));

        let to = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e"
            .parse::<alloy_primitives::Address>()
            .unwrap();
        let params = DynSolValue::Tuple(vec![
            DynSolValue::Address(to),
            DynSolValue::Uint(alloy_primitives::U256::from(1_000_000u64), 256),
        ])
        .abi_encode_params();
        let input = format!("0xa9059cbb{}", hex::encode(params));

        let call = decoder
            .decode("ethereum", &tx(&input, Some("0x02")))
            .await
            .unwrap();
        assert_eq!(call.function, "transfer");
        assert_eq!(call.params.get("_value").unwrap(), &shared_types::ParamValue::Uint("1000000".into()));
    }
}
