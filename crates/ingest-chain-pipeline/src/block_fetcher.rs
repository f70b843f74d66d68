//! Resolves a `HeadEvent` to a full block via `eth_getBlockByHash`.

use std::time::Duration;

use alloy_primitives::U256;
use quantum_telemetry::{time_histogram, BLOCKS_FETCHED, FETCH_DROPPED, FETCH_DURATION, FETCH_RETRIES};
use reqwest::Client;
use serde::Deserialize;
use shared_types::{GroupKey, HeadEvent, IngestError, Transaction};
use tracing::warn;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry schedule for transient fetch failures.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
        }
    }
}

/// A fetched block, with transactions in the wire-friendly shape expected
/// by the decoder and publisher (SPEC_FULL.md §3.1).
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub block_hash: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<RawBlock>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    hash: String,
    number: String,
    timestamp: String,
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    value: String,
    input: String,
    gas: String,
    #[serde(rename = "gasPrice", default)]
    gas_price: Option<String>,
    nonce: String,
    #[serde(rename = "blockHash")]
    block_hash: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "transactionIndex")]
    transaction_index: String,
    #[serde(rename = "type", default)]
    tx_type: Option<String>,
}

pub struct BlockFetcher {
    node_id: String,
    http_url: String,
    group: GroupKey,
    client: Client,
    config: FetchConfig,
}

impl BlockFetcher {
    pub fn new(node_id: impl Into<String>, http_url: impl Into<String>, group: GroupKey, config: FetchConfig) -> Self {
        Self {
            node_id: node_id.into(),
            http_url: http_url.into(),
            group,
            client: Client::new(),
            config,
        }
    }

    fn labels(&self) -> [&str; 3] {
        [
            self.group.network.as_str(),
            self.group.subnet.as_str(),
            self.group.vm_type.as_str(),
        ]
    }

    /// Fetch the full block referenced by `head`, retrying transient
    /// failures and classifying permanent ones per SPEC_FULL.md §4.5.
    pub async fn fetch(&self, head: &HeadEvent) -> Result<FetchedBlock, IngestError> {
        let mut attempt = 0u32;
        loop {
            let _timer = time_histogram!(FETCH_DURATION);
            match self.try_fetch(head).await {
                Ok(block) => {
                    BLOCKS_FETCHED.with_label_values(&self.labels()).inc();
                    return Ok(block);
                }
                Err(FetchFailure::Transient(reason)) => {
                    if attempt >= self.config.max_retries {
                        let [network, subnet, vm_type] = self.labels();
                        FETCH_DROPPED
                            .with_label_values(&[network, subnet, vm_type, "transient_exhausted"])
                            .inc();
                        return Err(IngestError::BlockFetchTransient {
                            node_id: self.node_id.clone(),
                            block_hash: head.block_hash.clone(),
                            reason,
                        });
                    }
                    warn!(node_id = %self.node_id, block_hash = %head.block_hash, attempt, %reason, "transient fetch failure, retrying");
                    FETCH_RETRIES.with_label_values(&self.labels()).inc();
                    let delay = backoff_delay(attempt, self.config.base_delay, self.config.max_delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(FetchFailure::Permanent(reason)) => {
                    warn!(node_id = %self.node_id, block_hash = %head.block_hash, %reason, "permanent fetch failure, dropping head event");
                    let [network, subnet, vm_type] = self.labels();
                    FETCH_DROPPED.with_label_values(&[network, subnet, vm_type, "permanent"]).inc();
                    return Err(IngestError::BlockFetchPermanent {
                        node_id: self.node_id.clone(),
                        block_hash: head.block_hash.clone(),
                        reason,
                    });
                }
            }
        }
    }

    async fn try_fetch(&self, head: &HeadEvent) -> Result<FetchedBlock, FetchFailure> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_getBlockByHash",
            "params": (head.block_hash.clone(), true),
            "id": 1,
        });

        let response = self
            .client
            .post(&self.http_url)
            .json(&request)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if response.status().is_server_error() {
            return Err(FetchFailure::Transient(format!("http {}", response.status())));
        }
        if !response.status().is_success() {
            return Err(FetchFailure::Permanent(format!("http {}", response.status())));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| FetchFailure::Permanent(format!("malformed json-rpc response: {e}")))?;

        if let Some(error) = body.error {
            return Err(FetchFailure::Permanent(format!("json-rpc error: {}", error.message)));
        }
        let raw = body
            .result
            .ok_or_else(|| FetchFailure::Permanent("block not found".to_string()))?;

        to_fetched_block(raw).map_err(FetchFailure::Permanent)
    }
}

enum FetchFailure {
    Transient(String),
    Permanent(String),
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() || e.is_connect() {
        FetchFailure::Transient(e.to_string())
    } else {
        FetchFailure::Permanent(e.to_string())
    }
}

fn to_fetched_block(raw: RawBlock) -> Result<FetchedBlock, String> {
    let block_number = parse_hex_u64(&raw.number).ok_or("malformed block number")?;
    let block_timestamp = parse_hex_u64(&raw.timestamp).ok_or("malformed block timestamp")?;

    let mut transactions = Vec::with_capacity(raw.transactions.len());
    for tx in raw.transactions {
        transactions.push(to_transaction(tx)?);
    }

    Ok(FetchedBlock {
        block_hash: raw.hash.to_lowercase(),
        block_number,
        block_timestamp,
        transactions,
    })
}

fn to_transaction(raw: RawTransaction) -> Result<Transaction, String> {
    let value = hex_to_decimal(&raw.value).ok_or("malformed transaction value")?;
    let block_number = parse_hex_u64(&raw.block_number).ok_or("malformed transaction block number")?;
    let transaction_index = parse_hex_u64(&raw.transaction_index).ok_or("malformed transaction index")?;

    Ok(Transaction {
        hash: raw.hash.to_lowercase(),
        from: raw.from.to_lowercase(),
        to: raw.to.map(|t| t.to_lowercase()),
        value,
        input: raw.input.to_lowercase(),
        gas: raw.gas.to_lowercase(),
        gas_price: raw.gas_price.unwrap_or_else(|| "0x0".to_string()).to_lowercase(),
        nonce: raw.nonce.to_lowercase(),
        block_hash: raw.block_hash.to_lowercase(),
        block_number,
        transaction_index,
        tx_type: raw.tx_type,
    })
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn hex_to_decimal(s: &str) -> Option<String> {
    let value = U256::from_str_radix(s.trim_start_matches("0x"), 16).ok()?;
    Some(value.to_string())
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    std::cmp::min(base.saturating_mul(1u32 << attempt.min(16)), max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_to_decimal_converts_wei_value() {
        assert_eq!(hex_to_decimal("0x3b9aca00"), Some("1000000000".to_string()));
    }

    #[test]
    fn parse_hex_u64_strips_prefix() {
        assert_eq!(parse_hex_u64("0x2a"), Some(42));
    }

    #[test]
    fn to_transaction_lowercases_addresses_and_hash() {
        let raw = RawTransaction {
            hash: "0xAA".into(),
            from: "0xFrom".into(),
            to: Some("0xTo".into()),
            value: "0x3e8".into(),
            input: "0x".into(),
            gas: "0x5208".into(),
            gas_price: Some("0x3b9aca00".into()),
            nonce: "0x1".into(),
            block_hash: "0xBLOCK".into(),
            block_number: "0xa".into(),
            transaction_index: "0x0".into(),
            tx_type: None,
        };
        let tx = to_transaction(raw).unwrap();
        assert_eq!(tx.hash, "0xaa");
        assert_eq!(tx.from, "0xfrom");
        assert_eq!(tx.to.as_deref(), Some("0xto"));
        assert_eq!(tx.value, "1000");
        assert_eq!(tx.block_number, 10);
    }
}
