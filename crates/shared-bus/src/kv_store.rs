//! # KV Store SPI
//!
//! Backs both the Node Registry Watcher (snapshot + watch + status writes)
//! and the Selector Cache's L2 tier (read-only `Get`). `RedisKvStore` is
//! the production adapter over a Valkey/Redis-protocol endpoint.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvStoreError {
    #[error("failed to connect to kv store at {0}")]
    Connect(String),

    #[error("kv store operation failed: {0}")]
    Operation(String),
}

/// The kind of change a watch stream entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    Put,
    Delete,
}

/// One entry from a watch stream: `(op, key, value)`. `value` is empty for deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub op: WatchOp,
    pub key: String,
    pub value: String,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Enumerate all keys under `prefix` as an initial snapshot.
    async fn snapshot(&self, prefix: &str) -> Result<Vec<(String, String)>, KvStoreError>;

    /// Subscribe to subsequent changes under `prefix`. Implementations may
    /// use keyspace notifications, change streams, or polling.
    async fn watch(
        &self,
        prefix: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<WatchEvent>, KvStoreError>;

    /// Write `key` = `value`.
    async fn put(&self, key: &str, value: &str) -> Result<(), KvStoreError>;

    /// Read-only lookup; `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError>;
}

/// Redis/Valkey-protocol adapter.
pub struct RedisKvStore {
    manager: redis::aio::ConnectionManager,
    client: redis::Client,
}

impl RedisKvStore {
    pub async fn connect(addr: &str) -> Result<Self, KvStoreError> {
        let client = redis::Client::open(addr).map_err(|e| KvStoreError::Connect(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| KvStoreError::Connect(e.to_string()))?;
        Ok(Self { manager, client })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn snapshot(&self, prefix: &str) -> Result<Vec<(String, String)>, KvStoreError> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| KvStoreError::Operation(e.to_string()))?;
            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let value: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| KvStoreError::Operation(e.to_string()))?;
            if let Some(value) = value {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    async fn watch(
        &self,
        prefix: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<WatchEvent>, KvStoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| KvStoreError::Connect(e.to_string()))?;
        pubsub
            .psubscribe(["__keyevent@0__:set", "__keyevent@0__:del"])
            .await
            .map_err(|e| KvStoreError::Operation(e.to_string()))?;

        let prefix = prefix.to_string();
        let manager = self.manager.clone();
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name();
                let key: String = match msg.get_payload() {
                    Ok(k) => k,
                    Err(_) => continue,
                };
                if !key.starts_with(&prefix) {
                    continue;
                }
                let op = if channel.ends_with(":del") {
                    WatchOp::Delete
                } else {
                    WatchOp::Put
                };

                let value = match op {
                    WatchOp::Delete => String::new(),
                    WatchOp::Put => {
                        let mut conn = manager.clone();
                        match conn.get::<_, Option<String>>(&key).await {
                            Ok(Some(value)) => value,
                            // Key already gone or unreadable by the time we
                            // fetched it; nothing to deliver.
                            Ok(None) | Err(_) => continue,
                        }
                    }
                };

                let event = WatchEvent { op, key, value };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), KvStoreError> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| KvStoreError::Operation(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|e| KvStoreError::Operation(e.to_string()))
    }
}
