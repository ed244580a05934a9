// types.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// A control-plane node as reported by the cluster. Identity is `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    pub internal_ip: String,
}

impl Node {
    pub fn new(name: impl Into<String>, internal_ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            internal_ip: internal_ip.into(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.internal_ip)
    }
}

/// Snapshot of the cluster taken once per run and never refreshed.
///
/// Every etcd node is also a master node; discovery refuses to build a
/// topology where either list is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTopology {
    pub master_nodes: Vec<Node>,
    pub etcd_nodes: Vec<Node>,
}

impl ClusterTopology {
    pub fn is_etcd(&self, name: &str) -> bool {
        self.etcd_nodes.iter().any(|n| n.name == name)
    }

    pub fn first_master(&self) -> Option<&Node> {
        self.master_nodes.first()
    }

    /// Nodes touched by a rotation, in discovery order, each exactly once.
    pub fn all_nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = Vec::new();
        for node in self.master_nodes.iter().chain(self.etcd_nodes.iter()) {
            if !nodes.iter().any(|n| n.name == node.name) {
                nodes.push(node);
            }
        }
        nodes
    }
}
