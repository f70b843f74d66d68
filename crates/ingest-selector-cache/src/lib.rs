//! # Selector Cache
//!
//! Two-tier lookup of `selector -> SelectorEntry`: an in-process `dashmap`
//! (L1, global lookups only) backed by the shared KV store (L2). Passed as
//! an explicit `Arc`-shared dependency to each Chain Pipeline / Decoder
//! rather than a process-wide singleton (SPEC_FULL.md §9).

mod cache;

pub use cache::{CacheLookupError, SelectorCache, SelectorLookup};
