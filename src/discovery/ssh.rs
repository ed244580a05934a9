// src/discovery/ssh.rs
use std::{fmt, sync::Arc};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    remote::{with_runner, Connector, RemoteError},
    types::Node,
};

/// What a reachable node answered during the pre-flight check.
#[derive(Debug, Clone)]
pub struct NodeCheck {
    pub node: Node,
    pub hostname: String,
    pub sudo_ok: Option<bool>,
}

#[derive(Debug)]
pub struct CheckFailure {
    pub node: Node,
    pub error: RemoteError,
}

/// Every node that could not be reached, reported together.
#[derive(Debug)]
pub struct ConnectivityError {
    pub failures: Vec<CheckFailure>,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node(s) failed the SSH check", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.node, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConnectivityError {}

fn check_node<C: Connector + ?Sized>(
    connector: &C,
    node: &Node,
    sudo_probe: bool,
) -> Result<NodeCheck, RemoteError> {
    with_runner(connector, node, |runner| {
        let hostname = runner.run("hostname")?.trim().to_string();
        let sudo_ok = if sudo_probe {
            Some(runner.run("sudo -n true").is_ok())
        } else {
            None
        };
        Ok(NodeCheck {
            node: node.clone(),
            hostname,
            sudo_ok,
        })
    })
}

/// Connects to every node at once. Results come back in `nodes` order.
pub async fn check_connectivity<C>(
    connector: Arc<C>,
    nodes: Vec<Node>,
    sudo_probe: bool,
) -> Result<Vec<NodeCheck>, ConnectivityError>
where
    C: Connector + 'static,
{
    let (tx, mut rx) = mpsc::channel(nodes.len().max(1));

    for (index, node) in nodes.iter().cloned().enumerate() {
        let tx = tx.clone();
        let connector = Arc::clone(&connector);
        tokio::task::spawn_blocking(move || {
            debug!(node = %node.name, "checking SSH");
            let result = check_node(connector.as_ref(), &node, sudo_probe);
            let _ = tx.blocking_send((index, node, result));
        });
    }
    drop(tx);

    let mut checks = Vec::new();
    let mut failures = Vec::new();
    while let Some((index, node, result)) = rx.recv().await {
        match result {
            Ok(check) => {
                info!(node = %node.name, hostname = %check.hostname, "SSH reachable");
                if check.sudo_ok == Some(false) {
                    warn!(node = %node.name, "passwordless sudo is not available");
                }
                checks.push((index, check));
            }
            Err(error) => {
                warn!(node = %node.name, %error, "SSH check failed");
                failures.push((index, CheckFailure { node, error }));
            }
        }
    }

    if !failures.is_empty() {
        failures.sort_by_key(|(i, _)| *i);
        return Err(ConnectivityError {
            failures: failures.into_iter().map(|(_, f)| f).collect(),
        });
    }
    checks.sort_by_key(|(i, _)| *i);
    Ok(checks.into_iter().map(|(_, c)| c).collect())
}
