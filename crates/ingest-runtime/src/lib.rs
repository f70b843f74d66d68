//! # Ingest Runtime
//!
//! The binary: loads [`config::RuntimeConfig`] from the environment, wires
//! every crate in the workspace into one running process (`wiring::run`),
//! and serves the Prometheus metrics endpoint. See SPEC_FULL.md §2.1, §6.

pub mod config;
pub mod metrics_server;
pub mod wiring;

pub use config::{ConfigError, RuntimeConfig};
