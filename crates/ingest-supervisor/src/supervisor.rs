//! Owns every `ChainGroupState`, starts/restarts Chain Pipelines, and is the
//! sole writer of `NodeStatus` (SPEC_FULL.md §4.2).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ingest_chain_pipeline::{ChainPipeline, PipelineConfig};
use ingest_publisher::EventPublisher as TransactionPublisher;
use ingest_registry_watcher::RegistryEvent;
use ingest_selector_cache::SelectorCache;
use parking_lot::RwLock;
use quantum_telemetry::{ACTIVE_PIPELINES, GROUP_ACTIVE_NODE, GROUP_NODE_SWITCHES};
use shared_bus::{BusClient, EventFilter, EventPublisher as _, EventTopic, InMemoryEventBus, KvStore, PipelineEvent};
use shared_types::{GroupKey, IngestError, NodeConfig, NodeStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::state::ChainGroupState;

/// Grace window for draining pipelines on shutdown, matching the Chain
/// Pipeline's own drain window (SPEC_FULL.md's cancellation section).
const SHUTDOWN_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Capacity of the per-group channel carrying replacement nodes to a
/// running pipeline. One in flight at a time is all that's ever needed.
const NODE_CHANNEL_CAPACITY: usize = 1;

pub struct Supervisor<C: BusClient> {
    groups: RwLock<HashMap<GroupKey, ChainGroupState>>,
    kv: Arc<dyn KvStore>,
    cache: Arc<SelectorCache>,
    publisher: Arc<TransactionPublisher<C>>,
    internal_bus: Arc<InMemoryEventBus>,
    pipeline_config: PipelineConfig,
    root_cancel: CancellationToken,
}

impl<C: BusClient + 'static> Supervisor<C> {
    pub fn new(
        kv: Arc<dyn KvStore>,
        cache: Arc<SelectorCache>,
        publisher: Arc<TransactionPublisher<C>>,
        internal_bus: Arc<InMemoryEventBus>,
        pipeline_config: PipelineConfig,
        root_cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            groups: RwLock::new(HashMap::new()),
            kv,
            cache,
            publisher,
            internal_bus,
            pipeline_config,
            root_cancel,
        })
    }

    /// Drive the supervisor until `root_cancel` fires: consume registry
    /// events and `ReselectRequest`s from running pipelines.
    pub async fn run(self: Arc<Self>, mut registry_rx: mpsc::Receiver<RegistryEvent>) {
        let mut reselect_sub = self.internal_bus.subscribe(EventFilter::topics(vec![EventTopic::Reselect]));

        loop {
            tokio::select! {
                _ = self.root_cancel.cancelled() => {
                    info!("supervisor cancelled, shutting down all chain pipelines");
                    self.shutdown_all().await;
                    return;
                }
                event = registry_rx.recv() => match event {
                    Some(event) => self.handle_registry_event(event).await,
                    None => {
                        warn!("registry event stream closed, shutting down");
                        self.shutdown_all().await;
                        return;
                    }
                },
                event = reselect_sub.recv() => match event {
                    Some(PipelineEvent::ReselectRequest { group, node_id }) => {
                        self.handle_reselect(&group, &node_id).await;
                    }
                    Some(_) => {}
                    None => {
                        warn!("internal bus closed, shutting down");
                        self.shutdown_all().await;
                        return;
                    }
                },
            }
        }
    }

    async fn handle_registry_event(self: &Arc<Self>, event: RegistryEvent) {
        match event {
            RegistryEvent::Added(cfg) | RegistryEvent::Updated(cfg) => self.handle_upsert(cfg).await,
            RegistryEvent::Deleted(id) => self.handle_deleted(&id).await,
        }
    }

    async fn handle_upsert(self: &Arc<Self>, cfg: NodeConfig) {
        let group = cfg.group_key();
        let needs_restart = {
            let mut groups = self.groups.write();
            let state = groups.entry(group.clone()).or_insert_with(ChainGroupState::new);

            let previous = state.nodes.get(&cfg.id).cloned();
            let cooldown_until = match &previous {
                Some(prev) => prev.cooldown_until,
                // A node arriving already marked Error/Stale has no known
                // failure time; start its cooldown from now rather than
                // treating it as immediately selectable.
                None if matches!(cfg.status, NodeStatus::Error | NodeStatus::Stale) => {
                    Some(Instant::now() + crate::state::ERROR_COOLDOWN)
                }
                None => None,
            };

            let changed_while_active = state.active_node_id.as_deref() == Some(cfg.id.as_str())
                && previous.as_ref().is_some_and(|prev| {
                    !cfg.enabled
                        || prev.config.http_url != cfg.http_url
                        || prev.config.wss_url != cfg.wss_url
                });

            state
                .nodes
                .insert(cfg.id.clone(), crate::state::NodeRecord { config: cfg.clone(), cooldown_until });

            changed_while_active
        };

        if needs_restart {
            info!(group = %group, node_id = %cfg.id, "active node config changed, restarting pipeline");
            self.restart_pipeline(&group).await;
        } else {
            self.ensure_started(&group).await;
        }
    }

    async fn handle_deleted(self: &Arc<Self>, id: &str) {
        let affected_group = {
            let mut groups = self.groups.write();
            let mut found = None;
            for (group, state) in groups.iter_mut() {
                if state.nodes.remove(id).is_some() {
                    found = Some((group.clone(), state.active_node_id.as_deref() == Some(id)));
                    break;
                }
            }
            found
        };

        let Some((group, was_active)) = affected_group else {
            return;
        };
        if was_active {
            info!(group = %group, node_id = %id, "active node removed from registry, restarting pipeline");
            self.restart_pipeline(&group).await;
        }
    }

    /// A running pipeline asked for a new active node after its head
    /// subscription failed. The pipeline is still alive, waiting on its
    /// node channel, so this only needs to feed (or close) that channel.
    async fn handle_reselect(self: &Arc<Self>, group: &GroupKey, failed_node_id: &str) {
        let now = Instant::now();
        let (failed_snapshot, escalated) = {
            let mut groups = self.groups.write();
            let Some(state) = groups.get_mut(group) else {
                return;
            };
            let escalated = state.record_failure(failed_node_id, now);
            let status = if escalated { NodeStatus::Error } else { NodeStatus::Unhealthy };
            state.mark_cooldown(failed_node_id, status, now);
            (state.nodes.get(failed_node_id).map(|r| r.config.clone()), escalated)
        };
        if let Some(node) = &failed_snapshot {
            if escalated {
                let err = IngestError::NodeFatal {
                    node_id: node.id.clone(),
                    reason: format!(
                        "{} head-stream interruptions within {}s",
                        crate::state::FAILURE_THRESHOLD,
                        crate::state::FAILURE_WINDOW.as_secs()
                    ),
                };
                error!(group = %group, node_id = %node.id, error = %err, "node escalated to Error after repeated interruptions");
            }
        }
        if let Some(node) = failed_snapshot {
            self.persist_status(&node).await;
        }

        let (candidate, node_tx) = {
            let mut groups = self.groups.write();
            let Some(state) = groups.get_mut(group) else {
                return;
            };
            let candidate = state.select_node(now, None);
            match &candidate {
                Some(node) => {
                    state.active_node_id = Some(node.id.clone());
                    if let Some(rec) = state.nodes.get_mut(&node.id) {
                        rec.config.status = NodeStatus::Active;
                    }
                }
                None => {
                    state.active_node_id = None;
                    // Dropping the sender closes the pipeline's node
                    // channel; its run loop sees `None` and exits cleanly.
                    state.node_tx = None;
                }
            }
            (candidate, state.node_tx.clone())
        };

        match candidate {
            Some(mut node) => {
                node.status = NodeStatus::Active;
                node.last_status_update = Some(Utc::now());
                GROUP_NODE_SWITCHES
                    .with_label_values(&[&group.network, &group.subnet, &group.vm_type])
                    .inc();
                self.set_active_gauge(group, &node.id);
                if let Some(tx) = node_tx {
                    if tx.send(node.clone()).await.is_err() {
                        warn!(group = %group, node_id = %node.id, "pipeline node channel closed before re-select could be delivered");
                    }
                }
                self.persist_status(&node).await;
            }
            None => {
                info!(group = %group, "no candidate node available, pipeline will wind down");
            }
        }
    }

    /// Start a pipeline for `group` if one isn't already running and at
    /// least one enabled, non-cooling-down node exists.
    async fn ensure_started(self: &Arc<Self>, group: &GroupKey) {
        let (node, generation) = {
            let mut groups = self.groups.write();
            let Some(state) = groups.get_mut(group) else {
                return;
            };
            if state.has_running_pipeline() {
                return;
            }
            let Some(node) = state.select_node(Instant::now(), None) else {
                return;
            };

            let (tx, rx) = mpsc::channel(NODE_CHANNEL_CAPACITY);
            let child_cancel = self.root_cancel.child_token();
            state.active_node_id = Some(node.id.clone());
            state.node_tx = Some(tx);
            state.pipeline_cancel = Some(child_cancel.clone());
            state.generation += 1;
            let generation = state.generation;
            if let Some(rec) = state.nodes.get_mut(&node.id) {
                rec.config.status = NodeStatus::Active;
            }

            let pipeline = ChainPipeline::new(
                group.clone(),
                self.cache.clone(),
                self.publisher.clone(),
                self.internal_bus.clone(),
                self.pipeline_config.clone(),
            );
            let node_for_run = node.clone();
            let handle = tokio::spawn(async move { pipeline.run(node_for_run, rx, child_cancel).await });
            state.pipeline_handle = Some(handle);

            (node, generation)
        };

        ACTIVE_PIPELINES.inc();
        GROUP_NODE_SWITCHES
            .with_label_values(&[&group.network, &group.subnet, &group.vm_type])
            .inc();
        self.set_active_gauge(group, &node.id);
        info!(group = %group, node_id = %node.id, "chain pipeline started");

        let mut node = node;
        node.status = NodeStatus::Active;
        node.last_status_update = Some(Utc::now());
        self.persist_status(&node).await;

        self.spawn_reaper(group.clone(), generation);
    }

    /// Cancel and forget the currently running pipeline (if any), then
    /// start a fresh one so config changes and node removals take effect
    /// immediately instead of waiting for the next failure.
    async fn restart_pipeline(self: &Arc<Self>, group: &GroupKey) {
        {
            let mut groups = self.groups.write();
            if let Some(state) = groups.get_mut(group) {
                if let Some(cancel) = state.pipeline_cancel.take() {
                    cancel.cancel();
                }
                state.node_tx = None;
                state.pipeline_handle = None;
                state.active_node_id = None;
                // Bump the generation so the outgoing pipeline's reaper
                // recognizes it has been superseded and skips its own
                // bookkeeping pass (this function already did it).
                state.generation += 1;
                ACTIVE_PIPELINES.dec();
            }
        }
        self.ensure_started(group).await;
    }

    /// Watch a spawned pipeline's task to completion and reconcile group
    /// state: clear bookkeeping, then restart if other nodes remain.
    /// Guarded by `generation` so a reaper for a stale pipeline can't
    /// clobber a pipeline that has since been restarted.
    fn spawn_reaper(self: &Arc<Self>, group: GroupKey, generation: u64) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            // Poll the stored handle rather than taking it, so other code
            // can still observe `has_running_pipeline()` while it runs.
            loop {
                let finished = {
                    let groups = supervisor.groups.read();
                    match groups.get(&group) {
                        Some(state) if state.generation == generation => state
                            .pipeline_handle
                            .as_ref()
                            .map(|h| h.is_finished())
                            .unwrap_or(true),
                        _ => true,
                    }
                };
                if finished {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            let should_restart = {
                let mut groups = supervisor.groups.write();
                let Some(state) = groups.get_mut(&group) else {
                    return;
                };
                if state.generation != generation {
                    // Already superseded by `restart_pipeline`.
                    return;
                }
                state.node_tx = None;
                state.pipeline_cancel = None;
                state.pipeline_handle = None;
                state.active_node_id = None;
                ACTIVE_PIPELINES.dec();
                state.any_enabled_node()
            };

            if should_restart {
                debug!(group = %group, "pipeline exited, attempting restart with another node");
                supervisor.ensure_started(&group).await;
            } else {
                info!(group = %group, "pipeline exited with no remaining candidate, group idle");
            }
        });
    }

    async fn shutdown_all(&self) {
        let cancels: Vec<CancellationToken> = {
            let groups = self.groups.read();
            groups.values().filter_map(|s| s.pipeline_cancel.clone()).collect()
        };
        for cancel in cancels {
            cancel.cancel();
        }

        let handles: Vec<tokio::task::JoinHandle<()>> = {
            let mut groups = self.groups.write();
            groups.values_mut().filter_map(|s| s.pipeline_handle.take()).collect()
        };
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_DRAIN_GRACE, drain).await.is_err() {
            warn!("supervisor shutdown drain window elapsed, pipelines force-dropped");
        }
    }

    fn set_active_gauge(&self, group: &GroupKey, node_id: &str) {
        let groups = self.groups.read();
        let Some(state) = groups.get(group) else { return };
        for id in state.nodes.keys() {
            let value = if id == node_id { 1.0 } else { 0.0 };
            GROUP_ACTIVE_NODE
                .with_label_values(&[&group.network, &group.subnet, &group.vm_type, id])
                .set(value);
        }
    }

    async fn persist_status(&self, node: &NodeConfig) {
        let key = NodeConfig::kv_key(&node.id);
        let payload = match serde_json::to_string(node) {
            Ok(payload) => payload,
            Err(e) => {
                error!(node_id = %node.id, error = %e, "failed to serialize node status, not persisted");
                return;
            }
        };

        let mut attempt = 0u32;
        loop {
            match self.kv.put(&key, &payload).await {
                Ok(()) => {
                    self.internal_bus
                        .publish(PipelineEvent::NodeStatusChanged {
                            node_id: node.id.clone(),
                            status: node.status,
                        })
                        .await;
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= 3 {
                        error!(node_id = %node.id, error = %e, "status write failed after retries, giving up");
                        return;
                    }
                    warn!(node_id = %node.id, attempt, error = %e, "status write failed, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::fakes::{FakeBusClient, FakeKvStore};

    fn node(id: &str, http_port: u16) -> NodeConfig {
        NodeConfig {
            id: id.to_string(),
            name: id.to_string(),
            network: "ethereum".into(),
            subnet: "mainnet".into(),
            vm_type: "evm".into(),
            // Nothing listens here; the head source fails fast, which is
            // exactly what these tests want to observe.
            http_url: format!("http://127.0.0.1:{http_port}"),
            wss_url: format!("ws://127.0.0.1:{http_port}"),
            enabled: true,
            status: NodeStatus::Unknown,
            last_status_update: None,
            last_error: None,
        }
    }

    fn test_pipeline_config() -> PipelineConfig {
        PipelineConfig {
            channel_capacity: 4,
            worker_count: 1,
            drain_grace: Duration::from_millis(100),
            ..PipelineConfig::default()
        }
    }

    fn test_supervisor(kv: Arc<FakeKvStore>, cancel: CancellationToken) -> Arc<Supervisor<FakeBusClient>> {
        test_supervisor_with_bus(kv, cancel).0
    }

    fn test_supervisor_with_bus(
        kv: Arc<FakeKvStore>,
        cancel: CancellationToken,
    ) -> (Arc<Supervisor<FakeBusClient>>, Arc<InMemoryEventBus>) {
        let kv_dyn: Arc<dyn KvStore> = kv;
        let cache = Arc::new(SelectorCache::new(kv_dyn.clone()));
        let bus = Arc::new(FakeBusClient::new());
        let publisher = Arc::new(TransactionPublisher::new(bus, ingest_publisher::PublishConfig::default()));
        let internal_bus = Arc::new(InMemoryEventBus::new());
        let supervisor = Supervisor::new(kv_dyn, cache, publisher, internal_bus.clone(), test_pipeline_config(), cancel);
        (supervisor, internal_bus)
    }

    #[tokio::test]
    async fn upsert_starts_a_pipeline_and_stamps_active_status() {
        let kv = Arc::new(FakeKvStore::new());
        let cancel = CancellationToken::new();
        let supervisor = test_supervisor(kv.clone(), cancel.clone());

        supervisor.handle_upsert(node("node-a", 1)).await;

        let raw = kv.get(&NodeConfig::kv_key("node-a")).await.unwrap().unwrap();
        let persisted: NodeConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.status, NodeStatus::Active);
        assert!(supervisor.groups.read().get(&node("node-a", 1).group_key()).unwrap().has_running_pipeline());

        cancel.cancel();
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn deleting_the_active_node_restarts_onto_the_remaining_candidate() {
        let kv = Arc::new(FakeKvStore::new());
        let cancel = CancellationToken::new();
        let supervisor = test_supervisor(kv.clone(), cancel.clone());

        supervisor.handle_upsert(node("node-a", 1)).await;
        supervisor.handle_upsert(node("node-b", 2)).await;
        // node-a sorts first lexicographically, so it's the one selected.
        let group = node("node-a", 1).group_key();
        assert_eq!(
            supervisor.groups.read().get(&group).unwrap().active_node_id.as_deref(),
            Some("node-a")
        );

        supervisor.handle_deleted("node-a").await;
        assert_eq!(
            supervisor.groups.read().get(&group).unwrap().active_node_id.as_deref(),
            Some("node-b")
        );

        cancel.cancel();
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn reselect_on_sole_node_parks_the_group() {
        let kv = Arc::new(FakeKvStore::new());
        let cancel = CancellationToken::new();
        let supervisor = test_supervisor(kv.clone(), cancel.clone());

        supervisor.handle_upsert(node("node-a", 1)).await;
        let group = node("node-a", 1).group_key();

        supervisor.handle_reselect(&group, "node-a").await;

        assert!(supervisor.groups.read().get(&group).unwrap().active_node_id.is_none());
        let raw = kv.get(&NodeConfig::kv_key("node-a")).await.unwrap().unwrap();
        let persisted: NodeConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.status, NodeStatus::Unhealthy);

        cancel.cancel();
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn stamping_status_publishes_node_status_changed_on_the_internal_bus() {
        let kv = Arc::new(FakeKvStore::new());
        let cancel = CancellationToken::new();
        let (supervisor, internal_bus) = test_supervisor_with_bus(kv, cancel.clone());
        let mut sub = internal_bus.subscribe(EventFilter::topics(vec![EventTopic::NodeStatus]));

        supervisor.handle_upsert(node("node-a", 1)).await;

        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event should arrive")
            .expect("subscription should not close");
        match event {
            PipelineEvent::NodeStatusChanged { node_id, status } => {
                assert_eq!(node_id, "node-a");
                assert_eq!(status, NodeStatus::Active);
            }
            other => panic!("expected NodeStatusChanged, got {other:?}"),
        }

        cancel.cancel();
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn repeated_reselects_within_the_window_escalate_to_error() {
        let kv = Arc::new(FakeKvStore::new());
        let cancel = CancellationToken::new();
        let supervisor = test_supervisor(kv.clone(), cancel.clone());

        supervisor.handle_upsert(node("node-a", 1)).await;
        supervisor.handle_upsert(node("node-b", 2)).await;
        let group = node("node-a", 1).group_key();

        supervisor.handle_reselect(&group, "node-a").await;
        supervisor.handle_reselect(&group, "node-a").await;
        supervisor.handle_reselect(&group, "node-a").await;

        let raw = kv.get(&NodeConfig::kv_key("node-a")).await.unwrap().unwrap();
        let persisted: NodeConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.status, NodeStatus::Error);

        cancel.cancel();
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn run_loop_honors_cancellation_and_drains_within_the_grace_window() {
        let kv = Arc::new(FakeKvStore::new());
        kv.seed(&NodeConfig::kv_key("node-a"), &serde_json::to_string(&node("node-a", 1)).unwrap());
        let cancel = CancellationToken::new();
        let supervisor = test_supervisor(kv.clone(), cancel.clone());

        let (tx, rx) = mpsc::channel::<RegistryEvent>(4);
        tx.send(RegistryEvent::Added(node("node-a", 1))).await.unwrap();

        let handle = tokio::spawn(supervisor.clone().run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "supervisor run loop must return once cancelled");
    }
}
