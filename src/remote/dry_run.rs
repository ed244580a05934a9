// src/remote/dry_run.rs
use std::path::Path;

use tracing::info;

use super::{Connector, RemoteError, Runner};
use crate::{cert::operations::write_file, types::Node};

/// Written in place of every file a dry run "downloads".
pub const DRY_RUN_PAYLOAD: &[u8] = b"dry-run placeholder\n";

/// Hands out [`DryRunRunner`]s. Never opens a connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunConnector;

impl Connector for DryRunConnector {
    fn connect(&self, node: &Node) -> Result<Box<dyn Runner>, RemoteError> {
        info!(node = %node.name, "[dry-run] would connect to {}", node.internal_ip);
        Ok(Box::new(DryRunRunner::new(&node.internal_ip)))
    }
}

/// Logs what would happen on a node. Only local downloads have an effect.
#[derive(Debug, Clone)]
pub struct DryRunRunner {
    host: String,
}

impl DryRunRunner {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
        }
    }
}

impl Runner for DryRunRunner {
    fn run(&mut self, command: &str) -> Result<String, RemoteError> {
        info!(host = %self.host, command, "[dry-run] would run command");
        Ok(format!("hostname-of-{}", self.host))
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        info!(host = %self.host, source = %local.display(), destination = remote, "[dry-run] would upload file");
        Ok(())
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        info!(host = %self.host, source = remote, destination = %local.display(), "[dry-run] would download file");
        write_file(local, DRY_RUN_PAYLOAD).map_err(|source| RemoteError::LocalIo {
            path: local.display().to_string(),
            source,
        })
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }
}
