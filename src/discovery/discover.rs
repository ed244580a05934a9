// src/discovery/discover.rs
use std::collections::HashSet;

use tracing::{debug, info};

use super::kubectl::{ClusterApi, KubeError};
use crate::types::{ClusterTopology, Node};

pub const CONTROL_PLANE_SELECTOR: &str = "node-role.kubernetes.io/control-plane";
pub const ETCD_SELECTOR: &str = "component=etcd";
pub const SYSTEM_NAMESPACE: &str = "kube-system";

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("cluster API: {0}")]
    Api(#[from] KubeError),

    #[error("no nodes labelled node-role.kubernetes.io/control-plane")]
    NoControlPlaneNodes,

    #[error("control-plane node {node} reports no InternalIP address")]
    MissingInternalIp { node: String },

    #[error("control-plane node {node} listed more than once")]
    DuplicateNode { node: String },

    #[error("no pods labelled component=etcd in kube-system")]
    NoEtcdWorkload,

    #[error("etcd pods run on {nodes:?}, none of which is a control-plane node")]
    EtcdNotColocated { nodes: Vec<String> },
}

/// Builds a fresh topology snapshot. Master order follows the API; etcd
/// nodes keep that same order.
pub async fn discover_topology<A: ClusterApi>(
    api: &A,
) -> Result<ClusterTopology, DiscoveryError> {
    let listed = api.list_nodes(CONTROL_PLANE_SELECTOR).await?;
    if listed.is_empty() {
        return Err(DiscoveryError::NoControlPlaneNodes);
    }

    let mut seen = HashSet::new();
    let mut master_nodes = Vec::with_capacity(listed.len());
    for node in &listed {
        let name = node.metadata.name.clone();
        if !seen.insert(name.clone()) {
            return Err(DiscoveryError::DuplicateNode { node: name });
        }
        let ip = node
            .internal_ip()
            .ok_or_else(|| DiscoveryError::MissingInternalIp { node: name.clone() })?;
        debug!(node = %name, ip, "control-plane node");
        master_nodes.push(Node::new(name, ip));
    }

    let pods = api.list_pods(SYSTEM_NAMESPACE, ETCD_SELECTOR).await?;
    if pods.is_empty() {
        return Err(DiscoveryError::NoEtcdWorkload);
    }
    let placements: HashSet<&str> = pods
        .iter()
        .filter_map(|p| p.spec.node_name.as_deref())
        .collect();

    let etcd_nodes: Vec<Node> = master_nodes
        .iter()
        .filter(|n| placements.contains(n.name.as_str()))
        .cloned()
        .collect();
    if etcd_nodes.is_empty() {
        let mut nodes: Vec<String> = placements.iter().map(|s| s.to_string()).collect();
        nodes.sort();
        return Err(DiscoveryError::EtcdNotColocated { nodes });
    }

    info!(
        masters = master_nodes.len(),
        etcd = etcd_nodes.len(),
        "discovered cluster topology"
    );
    Ok(ClusterTopology {
        master_nodes,
        etcd_nodes,
    })
}
