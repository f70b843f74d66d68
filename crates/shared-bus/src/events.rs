//! # Internal Pipeline Events
//!
//! Events that flow over the in-process choreography bus — head-event
//! fan-out and the reverse-direction command channel a Chain Pipeline
//! uses to ask the Supervisor for a new node, without ever holding a
//! handle back to it.

use serde::{Deserialize, Serialize};
use shared_types::{GroupKey, HeadEvent, NodeStatus};

/// All events carried on the in-process bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A Head Source observed a new block header.
    HeadReceived(HeadEvent),

    /// The Supervisor stamped a new status on a node.
    NodeStatusChanged {
        node_id: String,
        status: NodeStatus,
    },

    /// A Chain Pipeline asks the Supervisor to re-select the active node
    /// for its group, e.g. after a head-source failure.
    ReselectRequest { group: GroupKey, node_id: String },
}

impl PipelineEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::HeadReceived(_) => EventTopic::HeadStream,
            Self::NodeStatusChanged { .. } => EventTopic::NodeStatus,
            Self::ReselectRequest { .. } => EventTopic::Reselect,
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    HeadStream,
    NodeStatus,
    Reselect,
    All,
}

/// Filter for subscribing to a subset of topics.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self { topics }
    }

    pub fn matches(&self, event: &PipelineEvent) -> bool {
        self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic())
    }
}
