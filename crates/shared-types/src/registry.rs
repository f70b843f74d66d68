//! # Node Registry Entities
//!
//! `NodeConfig` is the identity of one RPC endpoint; `GroupKey` is the
//! (network, subnet, vm_type) tuple that groups interchangeable endpoints
//! into one logical chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group key identifying a logical chain: (network, subnet, vm_type).
///
/// All nodes sharing a group key are interchangeable endpoints for the
/// same chain; exactly one is ever `Active` at a time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub network: String,
    pub subnet: String,
    pub vm_type: String,
}

impl GroupKey {
    pub fn new(network: impl Into<String>, subnet: impl Into<String>, vm_type: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            subnet: subnet.into(),
            vm_type: vm_type.into(),
        }
    }

    /// Message bus subject for this group: `transactions.{vm_type}.{network}.{subnet}`.
    pub fn subject(&self) -> String {
        format!(
            "transactions.{}.{}.{}",
            self.vm_type.to_lowercase(),
            self.network.to_lowercase(),
            self.subnet.to_lowercase()
        )
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.network, self.subnet, self.vm_type)
    }
}

/// Operational status of a node, stamped exclusively by the Supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Unknown,
    Pending,
    Active,
    Unhealthy,
    Error,
    Stale,
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus::Unknown
    }
}

/// Identity and connection details for one RPC endpoint.
///
/// `id` is the primary key. `(network, subnet, vm_type)` is the group key:
/// all nodes sharing it are interchangeable endpoints for the same chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub name: String,
    pub network: String,
    pub subnet: String,
    pub vm_type: String,
    pub http_url: String,
    pub wss_url: String,
    pub enabled: bool,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub last_status_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl NodeConfig {
    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.network.clone(), self.subnet.clone(), self.vm_type.clone())
    }

    /// KV store key under which this record is stored: `node:config:{id}`.
    pub fn kv_key(id: &str) -> String {
        format!("node:config:{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, enabled: bool) -> NodeConfig {
        NodeConfig {
            id: id.to_string(),
            name: id.to_string(),
            network: "ethereum".into(),
            subnet: "mainnet".into(),
            vm_type: "evm".into(),
            http_url: "http://node".into(),
            wss_url: "ws://node".into(),
            enabled,
            status: NodeStatus::Unknown,
            last_status_update: None,
            last_error: None,
        }
    }

    #[test]
    fn group_key_subject_is_lowercased() {
        let key = GroupKey::new("Ethereum", "Mainnet", "EVM");
        assert_eq!(key.subject(), "transactions.evm.ethereum.mainnet");
    }

    #[test]
    fn node_config_round_trips_through_json() {
        let n = node("node-1", true);
        let json = serde_json::to_string(&n).unwrap();
        let back: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(n, back);
    }

}
