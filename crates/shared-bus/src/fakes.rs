//! # In-memory fakes
//!
//! `BusClient`/`KvStore` implementations with no real network dependency,
//! used by this crate's own tests and by downstream crates that enable
//! the `test-util` feature to exercise the Supervisor, Chain Pipeline,
//! and Selector Cache end-to-end without a live NATS/Redis endpoint.

use crate::bus_client::{BusClient, BusClientError};
use crate::kv_store::{KvStore, KvStoreError, WatchEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory `BusClient` fake. Records every successful publish and can be
/// configured to fail specific subjects (simulating ack timeouts).
pub struct FakeBusClient {
    pub published: Arc<AtomicUsize>,
    pub fail_subjects: Vec<String>,
}

impl FakeBusClient {
    pub fn new() -> Self {
        Self {
            published: Arc::new(AtomicUsize::new(0)),
            fail_subjects: Vec::new(),
        }
    }
}

impl Default for FakeBusClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for FakeBusClient {
    async fn publish_durable(
        &self,
        subject: &str,
        _payload: Vec<u8>,
        _ack_timeout: Duration,
    ) -> Result<(), BusClientError> {
        if self.fail_subjects.iter().any(|s| s == subject) {
            return Err(BusClientError::Publish {
                subject: subject.to_string(),
                reason: "forced test failure".into(),
            });
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory `KvStore` fake backed by a `HashMap`. `watch` returns an empty
/// stream — tests that need live watch behavior send into the channel
/// returned by `watch_sender` themselves.
pub struct FakeKvStore {
    pub entries: Mutex<HashMap<String, String>>,
}

impl FakeKvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn seed(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

impl Default for FakeKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for FakeKvStore {
    async fn snapshot(&self, prefix: &str) -> Result<Vec<(String, String)>, KvStoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn watch(
        &self,
        _prefix: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<WatchEvent>, KvStoreError> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), KvStoreError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }
}
