// src/app/rollback.rs
use tracing::{error, info, warn};

use super::{
    archive::{Archive, Phase},
    manager::{workspace_err, NodeFailure, Orchestrator, RotationError},
};
use crate::{
    discovery::ClusterApi,
    remote::{with_runner, Connector, RemoteError},
    types::{ClusterTopology, Node},
};

/// Nodes restored by a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub restored: Vec<String>,
}

impl<A, C> Orchestrator<A, C>
where
    A: ClusterApi + 'static,
    C: Connector + 'static,
{
    /// Pushes every node's `old/` tree back and restarts its kubelet. The
    /// node list comes from the run manifest, not from the live cluster.
    /// All nodes are attempted; failures are reported together.
    pub async fn rollback(&self) -> Result<RollbackReport, RotationError> {
        let manifest = self
            .archive
            .load_manifest()
            .map_err(|source| RotationError::NoPreparedRun {
                path: self.archive.manifest_path(),
                source,
            })?;
        if manifest.dry_run && !self.dry_run {
            return Err(RotationError::DryRunBackup);
        }

        info!(
            nodes = manifest.topology.all_nodes().len(),
            prepared_at = %manifest.started_at,
            "rolling back to the backed-up trust material"
        );
        let topology = manifest.topology;
        self.blocking(move |this| this.rollback_blocking(&topology))
            .await
    }

    fn rollback_blocking(&self, topology: &ClusterTopology) -> Result<RollbackReport, RotationError> {
        let mut restored = Vec::new();
        let mut failures = Vec::new();
        for node in topology.all_nodes() {
            match self.restore_node(node) {
                Ok(count) => {
                    info!(node = %node.name, files = count, "restored node");
                    restored.push(node.name.clone());
                }
                Err(e) => {
                    error!(node = %node.name, error = %e, "restore failed, continuing with remaining nodes");
                    failures.push(NodeFailure {
                        node: node.name.clone(),
                        error: e,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(RollbackReport { restored })
        } else {
            warn!(restored = restored.len(), failed = failures.len(), "rollback incomplete");
            Err(RotationError::Rollback { failures })
        }
    }

    fn restore_node(&self, node: &Node) -> Result<usize, RotationError> {
        let old = self.archive.phase_dir(&node.name, Phase::Old);
        let files = Archive::files_under(&old).map_err(workspace_err(&old))?;
        let mut pushes = Vec::with_capacity(files.len());
        for relative in files {
            let remote = self
                .archive
                .remote_path(&relative)
                .ok_or_else(|| RotationError::Unmapped {
                    path: relative.clone(),
                })?;
            pushes.push((old.join(relative), remote));
        }
        if pushes.is_empty() {
            return Err(RotationError::Workspace {
                path: old,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "backup is empty"),
            });
        }

        let restart = self.restart_command();
        with_runner(self.connector.as_ref(), node, |runner| {
            for (local, remote) in &pushes {
                runner.upload(local, remote)?;
            }
            runner.run(&restart)?;
            Ok::<_, RemoteError>(pushes.len())
        })
        .map_err(|source| RotationError::Restore {
            node: node.name.clone(),
            source,
        })
    }
}
