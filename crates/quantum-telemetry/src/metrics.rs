//! Prometheus metrics for the ingestion pipeline.
//!
//! All metrics follow the naming convention: `ingest_<component>_<metric>_<unit>`.
//! Exposed on `METRICS_PORT` as the health-check surface named in SPEC_FULL.md §6.
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g. `fetch_retries_total`)
//! - **Gauge**: Value that can go up or down (e.g. `active_pipelines`)
//! - **Histogram**: Distribution of values (e.g. publish latency)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramVec,
    Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // SUPERVISOR / PIPELINE LIFECYCLE (§4.2 ambient observability)
    // =========================================================================

    /// Number of Chain Pipelines currently running.
    pub static ref ACTIVE_PIPELINES: Gauge = Gauge::new(
        "ingest_active_pipelines",
        "Number of Chain Pipelines currently running"
    ).expect("metric creation failed");

    /// Active-node re-selections per group, labelled by group key.
    pub static ref GROUP_NODE_SWITCHES: CounterVec = CounterVec::new(
        Opts::new("ingest_group_node_switches_total", "Active-node re-selections per group"),
        &["network", "subnet", "vm_type"]
    ).expect("metric creation failed");

    /// Current active node per group, as a gauge with a `node_id` label set to 1.
    pub static ref GROUP_ACTIVE_NODE: GaugeVec = GaugeVec::new(
        Opts::new("ingest_group_active_node", "1 if node_id is the active node for the group"),
        &["network", "subnet", "vm_type", "node_id"]
    ).expect("metric creation failed");

    // =========================================================================
    // HEAD SOURCE
    // =========================================================================

    /// Head events received, labelled by group key.
    pub static ref HEADS_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("ingest_heads_received_total", "Head events received from a node subscription"),
        &["network", "subnet", "vm_type"]
    ).expect("metric creation failed");

    /// Head-stream interruptions (reconnects), labelled by group key.
    pub static ref HEAD_STREAM_INTERRUPTIONS: CounterVec = CounterVec::new(
        Opts::new("ingest_head_stream_interruptions_total", "Head subscription disconnects"),
        &["network", "subnet", "vm_type"]
    ).expect("metric creation failed");

    // =========================================================================
    // BLOCK FETCHER
    // =========================================================================

    /// Blocks fetched successfully.
    pub static ref BLOCKS_FETCHED: CounterVec = CounterVec::new(
        Opts::new("ingest_blocks_fetched_total", "Blocks successfully fetched via eth_getBlockByHash"),
        &["network", "subnet", "vm_type"]
    ).expect("metric creation failed");

    /// Fetch retries issued (transient failures only).
    pub static ref FETCH_RETRIES: CounterVec = CounterVec::new(
        Opts::new("ingest_fetch_retries_total", "Block fetch retry attempts"),
        &["network", "subnet", "vm_type"]
    ).expect("metric creation failed");

    /// Head events dropped after exhausting fetch retries or a permanent failure.
    pub static ref FETCH_DROPPED: CounterVec = CounterVec::new(
        Opts::new("ingest_fetch_dropped_total", "Head events dropped due to fetch failure"),
        &["network", "subnet", "vm_type", "reason"]
    ).expect("metric creation failed");

    /// Block fetch latency.
    pub static ref FETCH_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "ingest_fetch_duration_seconds",
            "Time spent fetching a block via eth_getBlockByHash"
        ).buckets(exponential_buckets(0.01, 2.0, 12).unwrap())
    ).expect("metric creation failed");

    // =========================================================================
    // TRANSACTION DECODER / SELECTOR CACHE
    // =========================================================================

    /// Transactions decoded, labelled by classification.
    pub static ref TRANSACTIONS_DECODED: CounterVec = CounterVec::new(
        Opts::new("ingest_transactions_decoded_total", "Transactions classified by the decoder"),
        &["kind"]  // transfer / contract_creation / function_call / undecoded
    ).expect("metric creation failed");

    /// Selector cache lookups, labelled by tier and outcome.
    pub static ref SELECTOR_CACHE_LOOKUPS: CounterVec = CounterVec::new(
        Opts::new("ingest_selector_cache_lookups_total", "Selector cache lookups by tier and outcome"),
        &["tier", "outcome"]  // tier: l1/l2/scoped, outcome: hit/miss/error
    ).expect("metric creation failed");

    // =========================================================================
    // PUBLISHER
    // =========================================================================

    /// Events published successfully.
    pub static ref EVENTS_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("ingest_events_published_total", "ProcessedTransactionEvents published"),
        &["network", "subnet", "vm_type"]
    ).expect("metric creation failed");

    /// Publish retries issued.
    pub static ref PUBLISH_RETRIES: CounterVec = CounterVec::new(
        Opts::new("ingest_publish_retries_total", "Publish retry attempts"),
        &["network", "subnet", "vm_type"]
    ).expect("metric creation failed");

    /// Events dropped after exhausting publish retries.
    pub static ref PUBLISH_FAILURES: CounterVec = CounterVec::new(
        Opts::new("ingest_publish_failures_total", "Events dropped after publish retries exhausted"),
        &["network", "subnet", "vm_type"]
    ).expect("metric creation failed");

    /// Publish latency (including ack wait).
    pub static ref PUBLISH_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "ingest_publish_duration_seconds",
            "Time spent publishing an event, including ack wait"
        ).buckets(exponential_buckets(0.001, 2.0, 15).unwrap())
    ).expect("metric creation failed");

    // =========================================================================
    // NODE REGISTRY WATCHER
    // =========================================================================

    /// Registry watch reconnects after `RegistryUnavailable`.
    pub static ref REGISTRY_RECONNECTS: Counter = Counter::new(
        "ingest_registry_reconnects_total",
        "Node registry watch reconnect attempts"
    ).expect("metric creation failed");

    // =========================================================================
    // ERRORS (cross-cutting)
    // =========================================================================

    /// Errors by component and kind, matching the `IngestError` taxonomy.
    pub static ref INGEST_ERRORS: CounterVec = CounterVec::new(
        Opts::new("ingest_errors_total", "Errors by component and error kind"),
        &["component", "kind"]
    ).expect("metric creation failed");
}

/// Handle for the metrics server.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_PIPELINES.clone()),
        Box::new(GROUP_NODE_SWITCHES.clone()),
        Box::new(GROUP_ACTIVE_NODE.clone()),
        Box::new(HEADS_RECEIVED.clone()),
        Box::new(HEAD_STREAM_INTERRUPTIONS.clone()),
        Box::new(BLOCKS_FETCHED.clone()),
        Box::new(FETCH_RETRIES.clone()),
        Box::new(FETCH_DROPPED.clone()),
        Box::new(FETCH_DURATION.clone()),
        Box::new(TRANSACTIONS_DECODED.clone()),
        Box::new(SELECTOR_CACHE_LOOKUPS.clone()),
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(PUBLISH_RETRIES.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
        Box::new(PUBLISH_DURATION.clone()),
        Box::new(REGISTRY_RECONNECTS.clone()),
        Box::new(INGEST_ERRORS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
