//! # Supervisor
//!
//! Owns the set of chain groups discovered from the node registry, applies
//! the node selection policy, and starts, restarts, or parks one Chain
//! Pipeline per group. The sole writer of `NodeStatus` (SPEC_FULL.md §4.2).

mod state;
mod supervisor;

pub use state::{ChainGroupState, NodeRecord, ERROR_COOLDOWN, UNHEALTHY_COOLDOWN};
pub use supervisor::Supervisor;
