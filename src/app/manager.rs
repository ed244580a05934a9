// src/app/manager.rs
use std::{fmt, io, path::PathBuf, sync::Arc, time::Duration};

use tracing::info;

use super::{
    archive::{Archive, RunManifest},
    health::HealthPolicy,
    rotate::Stage,
};
use crate::{
    cert::CertError,
    config::RotationConfig,
    discovery::{discover_topology, ClusterApi, DiscoveryError},
    kubeconfig::KubeconfigError,
    remote::{privileged, Connector, RemoteError},
    types::ClusterTopology,
};

/// Files a node's backup lacks, either required and absent or listed on
/// the node and failed to download. Paths are relative to the node's `old/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFiles {
    pub node: String,
    pub files: Vec<String>,
}

#[derive(Debug)]
pub struct NodeFailure {
    pub node: String,
    pub error: RotationError,
}

#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("workspace {} already holds a prepared run; move it aside before preparing again", path.display())]
    WorkspaceInUse { path: PathBuf },

    #[error("no prepared run in workspace ({}): {source}", path.display())]
    NoPreparedRun {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("the workspace backup was taken in dry-run mode and holds placeholders, refusing a live rollback")]
    DryRunBackup,

    #[error("workspace I/O on {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backup of {node} failed: {source}")]
    Backup {
        node: String,
        #[source]
        source: RemoteError,
    },

    #[error("backup incomplete: {}", describe_gaps(missing, failures))]
    IncompleteBackup {
        missing: Vec<MissingFiles>,
        failures: Vec<NodeFailure>,
    },

    #[error("cannot read API server SANs from {}: {source}", path.display())]
    SanExtraction {
        path: PathBuf,
        #[source]
        source: CertError,
    },

    #[error("certificate generation failed: {0}")]
    Cert(#[from] CertError),

    #[error("kubeconfig rewrite failed: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("{stage} has nothing to push for {node}")]
    EmptyStage { node: String, stage: Stage },

    #[error("{} has no remote counterpart", path.display())]
    Unmapped { path: PathBuf },

    #[error("{stage} failed on {node}: {source}")]
    Stage {
        node: String,
        stage: Stage,
        #[source]
        source: RemoteError,
    },

    #[error("{node} did not become Ready within {timeout:?} after {stage}")]
    HealthTimeout {
        node: String,
        stage: Stage,
        timeout: Duration,
    },

    #[error("restore of {node} failed: {source}")]
    Restore {
        node: String,
        #[source]
        source: RemoteError,
    },

    #[error("rollback failed on {} node(s): {}", failures.len(), describe_failures(failures))]
    Rollback { failures: Vec<NodeFailure> },

    #[error("background task failed: {0}")]
    Task(String),
}

fn describe_gaps(missing: &[MissingFiles], failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| f.error.to_string())
        .chain(
            missing
                .iter()
                .map(|m| format!("{} lacks {}", m.node, m.files.join(", "))),
        )
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.node, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

pub(crate) fn workspace_err(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> RotationError {
    let path = path.into();
    move |source| RotationError::Workspace { path, source }
}

/// Drives discovery, Prepare, Rotate and Rollback for one workspace.
///
/// Blocking SSH work runs on the blocking pool; health polling runs on the
/// calling task.
pub struct Orchestrator<A, C> {
    pub(crate) api: Arc<A>,
    pub(crate) connector: Arc<C>,
    pub(crate) config: Arc<RotationConfig>,
    pub(crate) archive: Archive,
    pub(crate) dry_run: bool,
    pub(crate) health: HealthPolicy,
}

impl<A, C> Clone for Orchestrator<A, C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            connector: Arc::clone(&self.connector),
            config: Arc::clone(&self.config),
            archive: self.archive.clone(),
            dry_run: self.dry_run,
            health: self.health,
        }
    }
}

impl<A, C> fmt::Debug for Orchestrator<A, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workspace", &self.archive.root())
            .field("dry_run", &self.dry_run)
            .field("health", &self.health)
            .finish()
    }
}

impl<A, C> Orchestrator<A, C>
where
    A: ClusterApi + 'static,
    C: Connector + 'static,
{
    pub fn new(api: A, connector: C, config: RotationConfig, dry_run: bool) -> Self {
        let archive = Archive::new(config.workspace_dir(), config.remote_paths.clone());
        let health = HealthPolicy {
            interval: config.rotation.health_interval(),
            timeout: config.rotation.health_timeout(),
        };
        Self {
            api: Arc::new(api),
            connector: Arc::new(connector),
            config: Arc::new(config),
            archive,
            dry_run,
            health,
        }
    }

    pub fn with_health_policy(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub async fn discover(&self) -> Result<ClusterTopology, RotationError> {
        Ok(discover_topology(self.api.as_ref()).await?)
    }

    /// Discover, Prepare, then Rotate against the freshly prepared run.
    pub async fn run(&self) -> Result<RunManifest, RotationError> {
        let topology = self.discover().await?;
        info!(
            nodes = topology.all_nodes().len(),
            dry_run = self.dry_run,
            order = %self.config.rotation.order,
            "starting certificate rotation"
        );
        let manifest = self.prepare(&topology).await?;
        self.rotate(&manifest).await?;
        info!("certificate rotation completed");
        Ok(manifest)
    }

    pub(crate) fn restart_command(&self) -> String {
        privileged(&self.config.rotation.restart_command, self.config.ssh.sudo)
    }

    /// Runs `f` on the blocking pool with its own handle to the orchestrator.
    pub(crate) async fn blocking<T, F>(&self, f: F) -> Result<T, RotationError>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T, RotationError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| RotationError::Task(e.to_string()))?
    }
}
