// src/app/run.rs
//
// Command handlers behind the CLI. Each one builds its collaborators from
// the loaded configuration and reports to stdout; progress goes to the log.
use std::sync::Arc;

use tracing::info;

use super::{archive::RunManifest, manager::Orchestrator};
use crate::{
    config::RotationConfig,
    discovery::{check_connectivity, discover_topology, ClusterApi, Kubectl},
    error::AppError,
    remote::{Connector, DryRunConnector, SshConnector},
    types::ClusterTopology,
    utils::prompt::confirm,
};

fn kubectl(config: &RotationConfig) -> Kubectl {
    Kubectl::new(config.resolve_kubeconfig())
}

fn print_topology(topology: &ClusterTopology) {
    println!("Control-plane nodes:");
    for node in &topology.master_nodes {
        let role = if topology.is_etcd(&node.name) {
            "control-plane, etcd"
        } else {
            "control-plane"
        };
        println!("  {:<24} {:<16} {}", node.name, node.internal_ip, role);
    }
}

fn print_manifest(manifest: &RunManifest) {
    println!("New CA fingerprints (SHA-256):");
    println!("  kubernetes   {}", manifest.new_ca_fingerprints.kubernetes);
    println!("  etcd         {}", manifest.new_ca_fingerprints.etcd);
    println!("  front-proxy  {}", manifest.new_ca_fingerprints.front_proxy);
}

/// Read-only pre-flight: API access, topology and SSH to every node.
pub async fn run_check(config: RotationConfig, sudo_probe: bool) -> Result<(), AppError> {
    let api = kubectl(&config);
    let version = api.server_version().await?;
    println!("API server reachable, version {}", version);

    let topology = discover_topology(&api).await?;
    print_topology(&topology);

    let connector = Arc::new(SshConnector::from_config(&config));
    let nodes = topology.all_nodes().into_iter().cloned().collect();
    let checks = check_connectivity(connector, nodes, sudo_probe).await?;

    println!("SSH:");
    for check in &checks {
        let sudo = match check.sudo_ok {
            Some(true) => ", sudo ok",
            Some(false) => ", sudo unavailable",
            None => "",
        };
        println!("  {:<24} hostname {}{}", check.node.name, check.hostname, sudo);
    }

    let without_sudo: Vec<String> = checks
        .iter()
        .filter(|c| c.sudo_ok == Some(false))
        .map(|c| c.node.name.clone())
        .collect();
    if !without_sudo.is_empty() {
        return Err(AppError::SudoUnavailable {
            nodes: without_sudo,
        });
    }
    println!("All checks passed.");
    Ok(())
}

pub async fn run_discover(config: RotationConfig) -> Result<(), AppError> {
    let topology = discover_topology(&kubectl(&config)).await?;
    print_topology(&topology);
    Ok(())
}

/// Prepare and Rotate. A dry run changes nothing on the nodes, so it does
/// not ask for confirmation.
pub async fn run_rotation(
    config: RotationConfig,
    dry_run: bool,
    assume_yes: bool,
) -> Result<(), AppError> {
    let api = kubectl(&config);
    if !dry_run && !assume_yes {
        let question = format!(
            "This replaces the Kubernetes, etcd and front-proxy CAs on every control-plane node \
             ({} order, backup in {}).",
            config.rotation.order,
            config.workspace_dir().display()
        );
        if !confirm(&question)? {
            return Err(AppError::Cancelled);
        }
    }

    let manifest = if dry_run {
        rotate_with(Orchestrator::new(api, DryRunConnector, config, true)).await?
    } else {
        let connector = SshConnector::from_config(&config);
        rotate_with(Orchestrator::new(api, connector, config, false)).await?
    };
    print_manifest(&manifest);
    if manifest.dry_run {
        println!("Dry run complete, no node was changed.");
    } else {
        println!("Rotation complete.");
    }
    Ok(())
}

async fn rotate_with<C: Connector + 'static>(
    orchestrator: Orchestrator<Kubectl, C>,
) -> Result<RunManifest, AppError> {
    info!(workspace = %orchestrator.archive().root().display(), "using workspace");
    Ok(orchestrator.run().await?)
}

pub async fn run_rollback(
    config: RotationConfig,
    dry_run: bool,
    assume_yes: bool,
) -> Result<(), AppError> {
    let api = kubectl(&config);
    if !dry_run && !assume_yes {
        let question = format!(
            "This pushes the backup in {} back to every node and restarts the kubelet.",
            config.workspace_dir().display()
        );
        if !confirm(&question)? {
            return Err(AppError::Cancelled);
        }
    }

    let report = if dry_run {
        Orchestrator::new(api, DryRunConnector, config, true)
            .rollback()
            .await?
    } else {
        let connector = SshConnector::from_config(&config);
        Orchestrator::new(api, connector, config, false)
            .rollback()
            .await?
    };
    println!("Restored: {}", report.restored.join(", "));
    Ok(())
}
