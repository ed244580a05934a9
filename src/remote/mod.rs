// src/remote/mod.rs
mod dry_run;
pub mod scp;
mod ssh;

use std::{io, path::Path};

use tracing::warn;

use crate::types::Node;

pub use dry_run::{DryRunConnector, DryRunRunner, DRY_RUN_PAYLOAD};
pub use scp::ScpError;
pub use ssh::{SshConnector, SshRunner};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("no SSH authentication method available for {user}@{host}: no agent and no key file")]
    NoAuthMethod { host: String, user: String },

    #[error("failed to connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("authentication as {user} on {host} failed: {message}")]
    Auth {
        host: String,
        user: String,
        message: String,
    },

    #[error("command `{command}` on {host} exited with {status}: {output}")]
    RemoteExec {
        host: String,
        command: String,
        status: i32,
        output: String,
    },

    #[error("ssh session error on {host}: {message}")]
    Session { host: String, message: String },

    #[error("transfer of {path} on {host} failed: {source}")]
    Transfer {
        host: String,
        path: String,
        #[source]
        source: ScpError,
    },

    #[error("local file {path}: {source}")]
    LocalIo {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A live session on one node. Paths on the remote side are absolute.
pub trait Runner: Send {
    /// Runs `command` and returns its combined stdout and stderr. A non-zero
    /// exit status is an error.
    fn run(&mut self, command: &str) -> Result<String, RemoteError>;

    /// Installs `local` at `remote`, creating parent directories.
    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// Copies `remote` to `local`, creating parent directories.
    fn download(&mut self, remote: &str, local: &Path) -> Result<(), RemoteError>;

    fn close(&mut self) -> Result<(), RemoteError>;
}

/// Opens [`Runner`]s. Real SSH and dry-run are interchangeable here.
pub trait Connector: Send + Sync {
    fn connect(&self, node: &Node) -> Result<Box<dyn Runner>, RemoteError>;
}

/// Connects to `node`, hands the session to `f`, and closes it whatever
/// `f` returns.
pub fn with_runner<C, T, E>(
    connector: &C,
    node: &Node,
    f: impl FnOnce(&mut dyn Runner) -> Result<T, E>,
) -> Result<T, E>
where
    C: Connector + ?Sized,
    E: From<RemoteError>,
{
    let mut runner = connector.connect(node)?;
    let result = f(runner.as_mut());
    if let Err(e) = runner.close() {
        warn!(node = %node.name, error = %e, "failed to close session");
    }
    result
}

/// `command` prefixed with non-interactive sudo when `sudo` is set.
pub fn privileged(command: &str, sudo: bool) -> String {
    if sudo {
        format!("sudo -n {}", command)
    } else {
        command.to_string()
    }
}

/// Single-quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
