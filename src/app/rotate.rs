// src/app/rotate.rs
use std::{fmt, path::{Path, PathBuf}};

use tracing::info;

use super::{
    archive::{is_ca_file, is_kubeconfig, Archive, Phase, RunManifest},
    health::wait_for_ready,
    manager::{workspace_err, Orchestrator, RotationError},
};
use crate::{
    config::RotationOrder,
    discovery::ClusterApi,
    remote::{with_runner, Connector, RemoteError},
    types::Node,
};

/// The three pushes each node goes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Old+new CA bundles and kubeconfigs trusting both.
    TrustExpansion,
    /// Leaf certificates and keys issued by the new CAs.
    LeafRotation,
    /// New CAs alone, plus kubeconfigs that trust only them.
    TrustContraction,
}

impl Stage {
    pub const ALL: [Stage; 3] = [
        Stage::TrustExpansion,
        Stage::LeafRotation,
        Stage::TrustContraction,
    ];

    fn source(self) -> Phase {
        match self {
            Stage::TrustExpansion => Phase::Bundle,
            Stage::LeafRotation | Stage::TrustContraction => Phase::New,
        }
    }

    fn includes(self, relative: &Path) -> bool {
        let trust = is_ca_file(relative) || is_kubeconfig(relative);
        match self {
            Stage::TrustExpansion => true,
            Stage::LeafRotation => !trust,
            Stage::TrustContraction => trust,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::TrustExpansion => write!(f, "trust expansion"),
            Stage::LeafRotation => write!(f, "leaf rotation"),
            Stage::TrustContraction => write!(f, "trust contraction"),
        }
    }
}

impl<A, C> Orchestrator<A, C>
where
    A: ClusterApi + 'static,
    C: Connector + 'static,
{
    /// Pushes a prepared run to the fleet one node and one stage at a time.
    /// The first failure stops the whole run.
    pub async fn rotate(&self, prepared: &RunManifest) -> Result<(), RotationError> {
        let nodes: Vec<Node> = prepared.topology.all_nodes().into_iter().cloned().collect();
        match self.config.rotation.order {
            RotationOrder::StageMajor => {
                for stage in Stage::ALL {
                    for node in &nodes {
                        self.apply_stage(node, stage).await?;
                    }
                }
            }
            RotationOrder::NodeMajor => {
                for node in &nodes {
                    for stage in Stage::ALL {
                        self.apply_stage(node, stage).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Local source and remote target of every file `stage` pushes to `node`.
    pub fn stage_files(
        &self,
        node: &str,
        stage: Stage,
    ) -> Result<Vec<(PathBuf, String)>, RotationError> {
        let dir = self.archive.phase_dir(node, stage.source());
        let files = Archive::files_under(&dir).map_err(workspace_err(&dir))?;

        let mut pushes = Vec::new();
        for relative in files.into_iter().filter(|f| stage.includes(f)) {
            let remote = self
                .archive
                .remote_path(&relative)
                .ok_or_else(|| RotationError::Unmapped {
                    path: relative.clone(),
                })?;
            pushes.push((dir.join(&relative), remote));
        }
        if pushes.is_empty() {
            return Err(RotationError::EmptyStage {
                node: node.to_string(),
                stage,
            });
        }
        Ok(pushes)
    }

    async fn apply_stage(&self, node: &Node, stage: Stage) -> Result<(), RotationError> {
        let files = self.stage_files(&node.name, stage)?;
        info!(node = %node.name, %stage, files = files.len(), "applying stage");

        let restart = self.restart_command();
        let target = node.clone();
        self.blocking(move |this| {
            with_runner(this.connector.as_ref(), &target, |runner| {
                for (local, remote) in &files {
                    runner.upload(local, remote)?;
                }
                runner.run(&restart)?;
                Ok::<_, RemoteError>(())
            })
            .map_err(|source| RotationError::Stage {
                node: target.name.clone(),
                stage,
                source,
            })
        })
        .await?;

        if self.dry_run {
            info!(node = %node.name, %stage, "[dry-run] skipping health check");
            return Ok(());
        }
        wait_for_ready(self.api.as_ref(), &node.name, self.health)
            .await
            .map_err(|timeout| RotationError::HealthTimeout {
                node: node.name.clone(),
                stage,
                timeout,
            })?;
        info!(node = %node.name, %stage, "stage complete");
        Ok(())
    }
}
