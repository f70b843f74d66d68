//! Snapshot-then-watch streaming of `NodeConfig` documents.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use shared_bus::{KvStore, WatchOp};
use shared_types::NodeConfig;
use thiserror::Error;
use tracing::{debug, warn};

/// Key prefix under which `NodeConfig` documents live in the registry KV store.
pub const NODE_CONFIG_PREFIX: &str = "node:config:";

/// Base delay for reconnect backoff after `RegistryUnavailable`.
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
/// Cap for reconnect backoff.
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RegistryWatchError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// One registry change, in the shape the Supervisor consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Added(NodeConfig),
    Updated(NodeConfig),
    Deleted(String),
}

/// Streams registry events from a `KvStore`, reconnecting the watch with
/// capped exponential backoff whenever it becomes unavailable.
pub struct RegistryWatcher {
    store: Arc<dyn KvStore>,
}

impl RegistryWatcher {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Replay a full snapshot as `Added` events, then forward subsequent
    /// changes from the watch stream, reconnecting on `RegistryUnavailable`.
    /// The returned receiver stays open for the watcher's lifetime; callers
    /// drop it (or the `RegistryWatcher`) to stop the background task.
    pub async fn run(&self, tx: tokio::sync::mpsc::Sender<RegistryEvent>) {
        let mut known_ids: HashSet<String> = HashSet::new();

        match self.store.snapshot(NODE_CONFIG_PREFIX).await {
            Ok(entries) => {
                debug!(count = entries.len(), "replaying node registry snapshot");
                for (key, value) in entries {
                    match serde_json::from_str::<NodeConfig>(&value) {
                        Ok(cfg) => {
                            known_ids.insert(cfg.id.clone());
                            if tx.send(RegistryEvent::Added(cfg)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(key = %key, error = %e, "skipping malformed node config in snapshot");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "initial registry snapshot failed");
            }
        }

        let mut attempt: u32 = 0;
        loop {
            let mut rx = match self.store.watch(NODE_CONFIG_PREFIX).await {
                Ok(rx) => {
                    attempt = 0;
                    rx
                }
                Err(e) => {
                    attempt += 1;
                    let delay = backoff_delay(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "registry watch unavailable, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            while let Some(event) = rx.recv().await {
                let id = event
                    .key
                    .strip_prefix(NODE_CONFIG_PREFIX)
                    .unwrap_or(&event.key)
                    .to_string();

                let mapped = match event.op {
                    WatchOp::Delete => {
                        known_ids.remove(&id);
                        Some(RegistryEvent::Deleted(id))
                    }
                    WatchOp::Put => match serde_json::from_str::<NodeConfig>(&event.value) {
                        Ok(cfg) => {
                            let is_new = known_ids.insert(cfg.id.clone());
                            Some(if is_new {
                                RegistryEvent::Added(cfg)
                            } else {
                                RegistryEvent::Updated(cfg)
                            })
                        }
                        Err(e) => {
                            warn!(key = %event.key, error = %e, "skipping malformed node config update");
                            None
                        }
                    },
                };

                if let Some(event) = mapped {
                    debug!(?event, "registry event");
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }

            // Watch stream ended without an explicit error: treat as a
            // disconnect and reconnect.
            attempt += 1;
            let delay = backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "registry watch stream ended, reconnecting");
            tokio::time::sleep(delay).await;
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let scaled = RECONNECT_BASE_DELAY.saturating_mul(1u32 << attempt.min(6));
    std::cmp::min(scaled, RECONNECT_MAX_DELAY)
}
