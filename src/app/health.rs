// src/app/health.rs
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::discovery::ClusterApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Polls until `node` reports `Ready`. The first poll happens one interval
/// after the call so a kubelet that was just restarted is not judged by its
/// stale status. Poll errors are logged and retried until the deadline.
pub async fn wait_for_ready<A: ClusterApi>(
    api: &A,
    node: &str,
    policy: HealthPolicy,
) -> Result<(), Duration> {
    info!(node, "waiting for node to become Ready");
    let poll = async {
        let mut ticker = time::interval_at(Instant::now() + policy.interval, policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match api.node_ready(node).await {
                Ok(true) => return,
                Ok(false) => debug!(node, "not Ready yet"),
                Err(e) => warn!(node, error = %e, "failed to read node status"),
            }
        }
    };

    match time::timeout(policy.timeout, poll).await {
        Ok(()) => {
            info!(node, "node is Ready");
            Ok(())
        }
        Err(_) => Err(policy.timeout),
    }
}
