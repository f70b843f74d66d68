//! # Node Registry Watcher
//!
//! Streams `NodeConfig` add/update/delete events out of the KV store backing
//! the node registry. On start, replays a full snapshot as a batch of
//! `Added` events before switching to incremental `watch` mode, so the
//! Supervisor never needs a separate bootstrap path.

mod watcher;

pub use watcher::{RegistryEvent, RegistryWatchError, RegistryWatcher};
