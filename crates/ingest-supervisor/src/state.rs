//! Per-group node bookkeeping and the node selection policy (SPEC_FULL.md §4.2).

use std::time::{Duration, Instant};

use shared_types::{NodeConfig, NodeStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cooldown applied after a node is demoted to `Unhealthy` by a head-stream
/// interruption: short, because a single bad connection is often transient.
pub const UNHEALTHY_COOLDOWN: Duration = Duration::from_secs(30);
/// Cooldown applied to `Error`/`Stale` nodes: longer, reserved for repeated
/// or structural failures (SPEC_FULL.md's `NodeFatal` class).
pub const ERROR_COOLDOWN: Duration = Duration::from_secs(300);

/// Window within which repeated head-stream interruptions escalate a node
/// from `Unhealthy` to `Error` (SPEC_FULL.md §7).
pub const FAILURE_WINDOW: Duration = Duration::from_secs(60);
/// Number of interruptions inside `FAILURE_WINDOW` that triggers escalation.
pub const FAILURE_THRESHOLD: usize = 3;

/// One node's registry record plus the Supervisor's private selection state.
/// `cooldown_until` is deliberately separate from `NodeStatus`: a node can
/// still read as `Error` in the registry after its cooldown has elapsed, and
/// the Supervisor must reconsider it anyway rather than waiting on a status
/// flip that nothing else will perform.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub config: NodeConfig,
    pub cooldown_until: Option<Instant>,
    /// Timestamps of recent head-stream interruptions, oldest first; pruned
    /// to `FAILURE_WINDOW` on every failure so the count reflects a rolling
    /// window rather than the node's entire lifetime.
    recent_failures: Vec<Instant>,
}

impl NodeRecord {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            cooldown_until: None,
            recent_failures: Vec::new(),
        }
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Eligible for selection: enabled, and not serving out a cooldown.
    /// Status itself is informational once a cooldown is tracked here.
    fn is_candidate(&self, now: Instant) -> bool {
        self.config.enabled && !self.in_cooldown(now)
    }

    /// Record a head-stream interruption at `now` and report whether the
    /// count within `FAILURE_WINDOW` has reached `FAILURE_THRESHOLD`.
    fn record_failure(&mut self, now: Instant) -> bool {
        self.recent_failures.retain(|&t| now.duration_since(t) < FAILURE_WINDOW);
        self.recent_failures.push(now);
        self.recent_failures.len() >= FAILURE_THRESHOLD
    }
}

/// Everything the Supervisor tracks for one (network, subnet, vm_type) group.
pub struct ChainGroupState {
    pub nodes: std::collections::BTreeMap<String, NodeRecord>,
    pub active_node_id: Option<String>,
    /// Channel the running pipeline reads replacement nodes from.
    pub node_tx: Option<mpsc::Sender<NodeConfig>>,
    pub pipeline_cancel: Option<CancellationToken>,
    pub pipeline_handle: Option<tokio::task::JoinHandle<()>>,
    /// Bumped every time a pipeline is (re)spawned for this group, so a
    /// reaper task watching an old handle can tell it's been superseded.
    pub generation: u64,
}

impl ChainGroupState {
    pub fn new() -> Self {
        Self {
            nodes: std::collections::BTreeMap::new(),
            active_node_id: None,
            node_tx: None,
            pipeline_cancel: None,
            pipeline_handle: None,
            generation: 0,
        }
    }

    pub fn has_running_pipeline(&self) -> bool {
        self.pipeline_handle.is_some()
    }

    pub fn any_enabled_node(&self) -> bool {
        self.nodes.values().any(|n| n.config.enabled)
    }

    /// Select the next active node: enabled, out of cooldown, lexicographic
    /// tiebreak on `id`. `exclude` is the node that just failed, if any —
    /// excluded even if its cooldown hasn't been recorded yet.
    pub fn select_node(&self, now: Instant, exclude: Option<&str>) -> Option<NodeConfig> {
        self.nodes
            .values()
            .filter(|n| n.is_candidate(now))
            .filter(|n| exclude.map_or(true, |id| n.config.id != id))
            .min_by(|a, b| a.config.id.cmp(&b.config.id))
            .map(|n| n.config.clone())
    }

    /// Record a head-stream interruption for `node_id`. Returns `true` once
    /// `FAILURE_THRESHOLD` interruptions have landed within `FAILURE_WINDOW`,
    /// meaning the caller should escalate the node to `Error` rather than
    /// the usual `Unhealthy`. A node with no record (already removed) never
    /// escalates.
    pub fn record_failure(&mut self, node_id: &str, now: Instant) -> bool {
        self.nodes.get_mut(node_id).is_some_and(|record| record.record_failure(now))
    }

    pub fn mark_cooldown(&mut self, node_id: &str, status: NodeStatus, now: Instant) {
        let duration = match status {
            NodeStatus::Unhealthy => UNHEALTHY_COOLDOWN,
            NodeStatus::Error | NodeStatus::Stale => ERROR_COOLDOWN,
            _ => return,
        };
        if let Some(record) = self.nodes.get_mut(node_id) {
            record.config.status = status;
            record.cooldown_until = Some(now + duration);
        }
    }
}

impl Default for ChainGroupState {
    fn default() -> Self {
        Self::new()
    }
}
