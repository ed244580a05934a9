mod discover;
mod kubectl;
mod ssh;

pub use discover::{discover_topology, DiscoveryError};
pub use kubectl::{
    ClusterApi, KubeError, Kubectl, NodeAddress, NodeCondition, NodeObject, NodeStatus,
    ObjectMeta, PodObject, PodSpec,
};
pub use ssh::{check_connectivity, ConnectivityError, NodeCheck};
