//! # Chain Pipeline
//!
//! One running instance per active chain group: a Head Source maintaining
//! the live WebSocket subscription, a pool of Block Fetchers resolving
//! heads to full blocks, and a pool of decode+publish workers — all
//! connected by bounded channels so a stalled downstream stage back-
//! pressures the WebSocket read itself (SPEC_FULL.md §4.3, §5).

mod block_fetcher;
mod head_source;
mod pipeline;

pub use block_fetcher::{BlockFetcher, FetchConfig, FetchedBlock};
pub use head_source::HeadSource;
pub use pipeline::{ChainPipeline, PipelineConfig};
