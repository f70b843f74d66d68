//! L1 (`dashmap`) + L2 (shared KV) selector lookup.

use std::sync::Arc;

use dashmap::DashMap;
use quantum_telemetry::SELECTOR_CACHE_LOOKUPS;
use shared_bus::KvStore;
use shared_types::SelectorEntry;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheLookupError {
    #[error("kv store unreachable: {0}")]
    Backend(String),
}

/// Which tier satisfied a lookup, or that it missed outright. The open
/// question in SPEC_FULL.md §9 resolves the L1 map as the fast path: an L1
/// hit short-circuits the L2 round trip entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorLookup {
    L1(SelectorEntry),
    L2(SelectorEntry),
    Miss,
}

impl SelectorLookup {
    pub fn entry(self) -> Option<SelectorEntry> {
        match self {
            SelectorLookup::L1(e) | SelectorLookup::L2(e) => Some(e),
            SelectorLookup::Miss => None,
        }
    }
}

/// Two-tier selector cache. `Arc`-shared across Chain Pipelines and their
/// Decoders; the L1 map is the only process-wide mutable state it owns.
pub struct SelectorCache {
    l1: DashMap<String, SelectorEntry>,
    kv: Arc<dyn KvStore>,
}

impl SelectorCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            l1: DashMap::new(),
            kv,
        }
    }

    /// Global (address-agnostic) lookup: `sel:{chain}:{selector}`. L1 is
    /// checked first; on miss, L2 is consulted and, on success, back-fills L1.
    pub async fn lookup_global(&self, chain: &str, selector: &str) -> SelectorLookup {
        let l1_key = format!("{}:{}", chain.to_lowercase(), selector.to_lowercase());

        if let Some(entry) = self.l1.get(&l1_key) {
            SELECTOR_CACHE_LOOKUPS.with_label_values(&["l1", "hit"]).inc();
            return SelectorLookup::L1(entry.clone());
        }
        SELECTOR_CACHE_LOOKUPS.with_label_values(&["l1", "miss"]).inc();

        let kv_key = SelectorEntry::global_kv_key(chain, selector);
        match self.kv.get(&kv_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<SelectorEntry>(&raw) {
                Ok(entry) => {
                    SELECTOR_CACHE_LOOKUPS.with_label_values(&["l2", "hit"]).inc();
                    self.l1.insert(l1_key, entry.clone());
                    SelectorLookup::L2(entry)
                }
                Err(e) => {
                    warn!(key = %kv_key, error = %e, "malformed selector entry, treating as miss");
                    SELECTOR_CACHE_LOOKUPS.with_label_values(&["l2", "miss"]).inc();
                    SelectorLookup::Miss
                }
            },
            Ok(None) => {
                debug!(key = %kv_key, "selector not found");
                SELECTOR_CACHE_LOOKUPS.with_label_values(&["l2", "miss"]).inc();
                SelectorLookup::Miss
            }
            Err(e) => {
                warn!(key = %kv_key, error = %e, "selector cache backend error, treating as miss");
                SELECTOR_CACHE_LOOKUPS.with_label_values(&["l2", "error"]).inc();
                SelectorLookup::Miss
            }
        }
    }

    /// Address-scoped lookup: `sel:{chain}:{address}:{selector}`. Bypasses
    /// L1 — the working set of (address, selector) pairs is unbounded.
    pub async fn lookup_scoped(&self, chain: &str, address: &str, selector: &str) -> SelectorLookup {
        let kv_key = SelectorEntry::scoped_kv_key(chain, address, selector);
        match self.kv.get(&kv_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<SelectorEntry>(&raw) {
                Ok(entry) => {
                    SELECTOR_CACHE_LOOKUPS.with_label_values(&["scoped", "hit"]).inc();
                    SelectorLookup::L2(entry)
                }
                Err(e) => {
                    warn!(key = %kv_key, error = %e, "malformed scoped selector entry, treating as miss");
                    SELECTOR_CACHE_LOOKUPS.with_label_values(&["scoped", "miss"]).inc();
                    SelectorLookup::Miss
                }
            },
            Ok(None) => {
                SELECTOR_CACHE_LOOKUPS.with_label_values(&["scoped", "miss"]).inc();
                SelectorLookup::Miss
            }
            Err(e) => {
                warn!(key = %kv_key, error = %e, "selector cache backend error, treating as miss");
                SELECTOR_CACHE_LOOKUPS.with_label_values(&["scoped", "error"]).inc();
                SelectorLookup::Miss
            }
        }
    }

    /// Number of distinct selectors currently resident in L1 (diagnostic only).
    pub fn l1_len(&self) -> usize {
        self.l1.len()
    }
}
