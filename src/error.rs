// src/error.rs
use std::io;

use crate::{
    app::RotationError,
    config::ConfigError,
    discovery::{ConnectivityError, DiscoveryError, KubeError},
};

/// Everything a command can fail with, as reported to the operator.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cluster API unreachable: {0}")]
    Kube(#[from] KubeError),

    #[error("topology discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error("passwordless sudo is not available on: {}", nodes.join(", "))]
    SudoUnavailable { nodes: Vec<String> },

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error("cancelled, nothing was changed")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
