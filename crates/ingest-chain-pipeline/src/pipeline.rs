//! One active (network, subnet, vm_type) group's head -> fetch -> decode
//! -> publish stages, wired by bounded channels (SPEC_FULL.md §4.3).

use std::sync::Arc;
use std::time::Duration;

use ingest_decoder::TransactionDecoder;
use ingest_publisher::{EventPublisher as TransactionPublisher, PublishConfig};
use ingest_selector_cache::SelectorCache;
use quantum_telemetry::HEADS_RECEIVED;
use quantum_telemetry::HEAD_STREAM_INTERRUPTIONS;
use shared_bus::{BusClient, EventPublisher as _, InMemoryEventBus, PipelineEvent};
use shared_types::{GroupKey, HeadEvent, IngestError, NodeConfig, ProcessedTransactionEvent};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::block_fetcher::{BlockFetcher, FetchConfig};
use crate::head_source::HeadSource;

/// Channel capacities, worker pool sizes, and grace windows for one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub worker_count: usize,
    pub fetch: FetchConfig,
    pub publish: PublishConfig,
    pub drain_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            worker_count: 4,
            fetch: FetchConfig::default(),
            publish: PublishConfig::default(),
            drain_grace: Duration::from_secs(10),
        }
    }
}

/// One running instance of the head -> fetch -> decode+publish pipeline
/// for a single chain group. Owns no handle back to the Supervisor; it
/// asks for a new node only by sending `ReselectRequest` on the shared bus.
pub struct ChainPipeline<C: BusClient> {
    group: GroupKey,
    cache: Arc<SelectorCache>,
    publisher: Arc<TransactionPublisher<C>>,
    internal_bus: Arc<InMemoryEventBus>,
    config: PipelineConfig,
}

impl<C: BusClient + 'static> ChainPipeline<C> {
    pub fn new(
        group: GroupKey,
        cache: Arc<SelectorCache>,
        publisher: Arc<TransactionPublisher<C>>,
        internal_bus: Arc<InMemoryEventBus>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            group,
            cache,
            publisher,
            internal_bus,
            config,
        }
    }

    /// Drive the pipeline against `initial_node`, failing over to whatever
    /// node arrives on `node_rx` whenever the active head subscription dies,
    /// until cancelled or `node_rx` closes with no further candidate.
    pub async fn run(&self, initial_node: NodeConfig, mut node_rx: mpsc::Receiver<NodeConfig>, cancel: CancellationToken) {
        let mut current = initial_node;

        loop {
            info!(group = %self.group, node_id = %current.id, "chain pipeline activating node");
            let outcome = self.run_with_node(&current, cancel.clone()).await;

            if cancel.is_cancelled() {
                info!(group = %self.group, "chain pipeline cancelled, exiting");
                return;
            }

            match outcome {
                Ok(()) => {
                    info!(group = %self.group, node_id = %current.id, "head source ended cleanly");
                    return;
                }
                Err(reason) => {
                    warn!(group = %self.group, node_id = %current.id, %reason, "head source interrupted, requesting re-select");
                    HEAD_STREAM_INTERRUPTIONS
                        .with_label_values(&[&self.group.network, &self.group.subnet, &self.group.vm_type])
                        .inc();
                    self.internal_bus
                        .publish(PipelineEvent::ReselectRequest {
                            group: self.group.clone(),
                            node_id: current.id.clone(),
                        })
                        .await;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(group = %self.group, "chain pipeline cancelled while awaiting re-select");
                    return;
                }
                next = node_rx.recv() => match next {
                    Some(node) => current = node,
                    None => {
                        info!(group = %self.group, "no candidate node available, chain pipeline exiting");
                        return;
                    }
                },
            }
        }
    }

    /// Run one generation of the pipeline against a single active node,
    /// returning when the head source ends (cleanly or with an error).
    async fn run_with_node(&self, node: &NodeConfig, cancel: CancellationToken) -> Result<(), String> {
        let (head_tx, head_rx) = mpsc::channel::<HeadEvent>(self.config.channel_capacity);
        let (block_tx, block_rx) = mpsc::channel::<crate::block_fetcher::FetchedBlock>(self.config.channel_capacity);
        let head_rx = Arc::new(Mutex::new(head_rx));
        let block_rx = Arc::new(Mutex::new(block_rx));

        let fetcher = Arc::new(BlockFetcher::new(
            node.id.clone(),
            node.http_url.clone(),
            self.group.clone(),
            self.config.fetch.clone(),
        ));
        let mut fetch_handles = Vec::with_capacity(self.config.worker_count);
        for _ in 0..self.config.worker_count {
            let head_rx = head_rx.clone();
            let fetcher = fetcher.clone();
            let block_tx = block_tx.clone();
            let group = self.group.clone();
            fetch_handles.push(tokio::spawn(async move {
                loop {
                    let head = { head_rx.lock().await.recv().await };
                    let Some(head) = head else { break };
                    HEADS_RECEIVED
                        .with_label_values(&[&group.network, &group.subnet, &group.vm_type])
                        .inc();
                    if let Ok(block) = fetcher.fetch(&head).await {
                        if block_tx.send(block).await.is_err() {
                            break;
                        }
                    }
                }
            }));
        }
        drop(block_tx);

        let decoder = Arc::new(TransactionDecoder::new(self.cache.clone()));
        let mut decode_handles = Vec::with_capacity(self.config.worker_count);
        for _ in 0..self.config.worker_count {
            let block_rx = block_rx.clone();
            let decoder = decoder.clone();
            let publisher = self.publisher.clone();
            let group = self.group.clone();
            decode_handles.push(tokio::spawn(async move {
                loop {
                    let block = { block_rx.lock().await.recv().await };
                    let Some(block) = block else { break };
                    for tx in block.transactions {
                        let decoded_call = decoder.decode(&group.network, &tx).await;
                        let event = ProcessedTransactionEvent::new(
                            group.clone(),
                            block.block_hash.clone(),
                            block.block_number,
                            block.block_timestamp,
                            tx,
                            decoded_call,
                        );
                        publisher.publish(&event).await;
                    }
                }
            }));
        }

        let head_source = HeadSource::new(node.id.clone(), node.wss_url.clone(), self.internal_bus.clone());
        let result = head_source.run(head_tx, cancel).await;

        // Draining: dropping head_tx already happened when `run` returned;
        // give the pools a grace window to flush in-flight work.
        let drain = async {
            for handle in fetch_handles {
                let _ = handle.await;
            }
            for handle in decode_handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.config.drain_grace, drain).await.is_err() {
            warn!(node_id = %node.id, "pipeline drain grace window elapsed, workers force-dropped");
        }

        match result {
            Ok(()) => Ok(()),
            Err(IngestError::HeadStreamInterrupted { reason, .. }) => Err(reason),
            Err(other) => Err(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::fakes::{FakeBusClient, FakeKvStore};

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            channel_capacity: 4,
            worker_count: 1,
            drain_grace: Duration::from_millis(200),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn pipeline_exits_cleanly_when_no_candidate_after_interruption() {
        let group = GroupKey::new("ethereum", "mainnet", "evm");
        let cache = Arc::new(SelectorCache::new(Arc::new(FakeKvStore::new())));
        let bus_client = Arc::new(FakeBusClient::new());
        let publisher = Arc::new(TransactionPublisher::new(bus_client, PublishConfig::default()));
        let internal_bus = Arc::new(InMemoryEventBus::new());

        let pipeline = ChainPipeline::new(group, cache, publisher, internal_bus, test_config());

        let node = NodeConfig {
            id: "node-1".into(),
            name: "node-1".into(),
            network: "ethereum".into(),
            subnet: "mainnet".into(),
            vm_type: "evm".into(),
            http_url: "http://127.0.0.1:0".into(),
            wss_url: "ws://127.0.0.1:0".into(),
            enabled: true,
            status: shared_types::NodeStatus::Unknown,
            last_status_update: None,
            last_error: None,
        };
        let (_node_tx, node_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        // The head source will fail to connect immediately (nothing is
        // listening on 127.0.0.1:0), so the pipeline should observe an
        // interruption, find no replacement node, and return promptly.
        let result = tokio::time::timeout(Duration::from_secs(5), pipeline.run(node, node_rx, cancel)).await;
        assert!(result.is_ok(), "pipeline.run should return once node_rx closes");
    }
}
