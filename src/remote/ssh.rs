// src/remote/ssh.rs
use std::{
    fs,
    io::Read,
    net::{TcpStream, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

use ssh2::{Channel, ExtendedData, Session};
use tracing::debug;
use uuid::Uuid;

use super::{
    privileged,
    scp::{self, DEFAULT_MODE},
    shell_quote, Connector, RemoteError, Runner,
};
use crate::{cert::operations, config::RotationConfig, types::Node};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SESSION_TIMEOUT_MS: u32 = 60_000;

/// Opens authenticated SSH sessions to nodes by internal IP.
#[derive(Debug, Clone)]
pub struct SshConnector {
    user: String,
    key_path: Option<PathBuf>,
    port: u16,
    sudo: bool,
}

impl SshConnector {
    pub fn from_config(config: &RotationConfig) -> Self {
        Self {
            user: config.ssh.user.clone(),
            key_path: config.ssh_key_path(),
            port: config.ssh.port,
            sudo: config.ssh.sudo,
        }
    }
}

impl Connector for SshConnector {
    fn connect(&self, node: &Node) -> Result<Box<dyn Runner>, RemoteError> {
        let runner = SshRunner::connect(
            &node.internal_ip,
            self.port,
            &self.user,
            self.key_path.as_deref(),
            self.sudo,
        )?;
        Ok(Box::new(runner))
    }
}

pub struct SshRunner {
    host: String,
    session: Session,
    sudo: bool,
}

impl SshRunner {
    /// Tries the SSH agent first, then the key file.
    pub fn connect(
        host: &str,
        port: u16,
        user: &str,
        key_path: Option<&Path>,
        sudo: bool,
    ) -> Result<Self, RemoteError> {
        let agent_available = std::env::var_os("SSH_AUTH_SOCK").is_some();
        if !agent_available && key_path.is_none() {
            return Err(RemoteError::NoAuthMethod {
                host: host.to_string(),
                user: user.to_string(),
            });
        }

        let connect_err = |message: String| RemoteError::Connect {
            host: host.to_string(),
            message,
        };
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?
            .next()
            .ok_or_else(|| connect_err("address did not resolve".to_string()))?;
        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| connect_err(e.to_string()))?;

        let mut session = Session::new().map_err(|e| connect_err(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(SESSION_TIMEOUT_MS);
        session
            .handshake()
            .map_err(|e| connect_err(format!("handshake: {}", e)))?;

        let mut last_failure = String::from("no method accepted");
        if agent_available {
            if let Err(e) = session.userauth_agent(user) {
                debug!(host, error = %e, "agent authentication failed");
                last_failure = format!("agent: {}", e);
            }
        }
        if !session.authenticated() {
            if let Some(key) = key_path {
                if let Err(e) = session.userauth_pubkey_file(user, None, key, None) {
                    last_failure = format!("key {}: {}", key.display(), e);
                }
            }
        }
        if !session.authenticated() {
            return Err(RemoteError::Auth {
                host: host.to_string(),
                user: user.to_string(),
                message: last_failure,
            });
        }

        debug!(host, user, "ssh session established");
        Ok(Self {
            host: host.to_string(),
            session,
            sudo,
        })
    }

    fn session_err(&self, e: ssh2::Error) -> RemoteError {
        RemoteError::Session {
            host: self.host.clone(),
            message: e.to_string(),
        }
    }

    fn exec(&self, command: &str, merge_stderr: bool) -> Result<Channel, RemoteError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| self.session_err(e))?;
        if merge_stderr {
            channel
                .handle_extended_data(ExtendedData::Merge)
                .map_err(|e| self.session_err(e))?;
        }
        channel.exec(command).map_err(|e| self.session_err(e))?;
        Ok(channel)
    }

    /// Closes `channel` and turns a non-zero exit into `RemoteExec`.
    fn finish(&self, mut channel: Channel, command: &str, output: String) -> Result<String, RemoteError> {
        channel.send_eof().map_err(|e| self.session_err(e))?;
        channel.wait_close().map_err(|e| self.session_err(e))?;
        let status = channel.exit_status().map_err(|e| self.session_err(e))?;
        if status != 0 {
            return Err(RemoteError::RemoteExec {
                host: self.host.clone(),
                command: command.to_string(),
                status,
                output,
            });
        }
        Ok(output)
    }

    fn transfer_err(&self, path: &str, source: scp::ScpError) -> RemoteError {
        RemoteError::Transfer {
            host: self.host.clone(),
            path: path.to_string(),
            source,
        }
    }
}

impl Runner for SshRunner {
    fn run(&mut self, command: &str) -> Result<String, RemoteError> {
        debug!(host = %self.host, command, "running remote command");
        let mut channel = self.exec(command, true)?;
        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| RemoteError::Session {
                host: self.host.clone(),
                message: e.to_string(),
            })?;
        self.finish(channel, command, output)
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let data = fs::read(local).map_err(|source| RemoteError::LocalIo {
            path: local.display().to_string(),
            source,
        })?;
        let mode = file_mode(local).unwrap_or(DEFAULT_MODE);

        let staging = format!("/tmp/k8s-cert-rotation-{}", Uuid::new_v4());
        let name = Path::new(remote)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let command = format!("scp -t {}", shell_quote(&staging));
        let mut channel = self.exec(&command, false)?;
        scp::send_file(&mut channel, &name, mode, &data)
            .map_err(|e| self.transfer_err(remote, e))?;
        self.finish(channel, &command, String::new())?;

        let parent = Path::new(remote)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| "/".to_string());
        let mut install = format!(
            "{} && {}",
            privileged(&format!("mkdir -p {}", shell_quote(&parent)), self.sudo),
            privileged(
                &format!("mv -f {} {}", shell_quote(&staging), shell_quote(remote)),
                self.sudo
            ),
        );
        if self.sudo {
            install.push_str(&format!(" && sudo -n chown root:root {}", shell_quote(remote)));
        }
        if let Err(e) = self.run(&install) {
            let _ = self.run(&format!("rm -f {}", shell_quote(&staging)));
            return Err(e);
        }
        debug!(host = %self.host, remote, "uploaded");
        Ok(())
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let command = privileged(&format!("scp -f {}", shell_quote(remote)), self.sudo);
        let mut channel = self.exec(&command, false)?;
        let (header, data) =
            scp::receive_file(&mut channel).map_err(|e| self.transfer_err(remote, e))?;
        self.finish(channel, &command, String::new())?;

        let written = if header.mode & 0o077 == 0 {
            operations::write_private_file(local, &data)
        } else {
            operations::write_file(local, &data)
        };
        written.map_err(|source| RemoteError::LocalIo {
            path: local.display().to_string(),
            source,
        })?;
        debug!(host = %self.host, remote, bytes = data.len(), "downloaded");
        Ok(())
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        self.session
            .disconnect(None, "rotation finished", None)
            .map_err(|e| self.session_err(e))
    }
}

#[cfg(unix)]
fn file_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> Option<u32> {
    None
}
