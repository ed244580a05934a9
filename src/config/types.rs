// config/types.rs
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::cert::parse_subject;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationConfig {
    #[serde(default)]
    pub kubeconfig_path: String,
    pub ssh: SshConfig,
    pub workspace: String,
    #[serde(default)]
    pub remote_paths: RemotePaths,
    #[serde(default)]
    pub certificates: CertificateSettings,
    #[serde(default)]
    pub rotation: RotationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    pub user: String,
    #[serde(default)]
    pub key_path: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    // Run restarts, listings and file moves under `sudo -n`.
    #[serde(default)]
    pub sudo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePaths {
    pub kubernetes_dir: String,
    pub etcd_ssl_dir: String,
}

impl Default for RemotePaths {
    fn default() -> Self {
        Self {
            kubernetes_dir: "/etc/kubernetes".to_string(),
            etcd_ssl_dir: "/etc/ssl/etcd/ssl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSettings {
    pub ca_expiry_days: u32,
    pub cert_expiry_days: u32,
    pub kubernetes_ca_subject: String,
    pub etcd_ca_subject: String,
    pub front_proxy_ca_subject: String,
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            ca_expiry_days: 3650,
            cert_expiry_days: 365,
            kubernetes_ca_subject: "/CN=kubernetes".to_string(),
            etcd_ca_subject: "/CN=etcd-ca".to_string(),
            front_proxy_ca_subject: "/CN=front-proxy-ca".to_string(),
        }
    }
}

/// How the sequential Rotate phase walks nodes and stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationOrder {
    /// Every node runs a stage before any node starts the next stage.
    #[default]
    StageMajor,
    /// Every node runs all three stages before the next node starts.
    NodeMajor,
}

impl fmt::Display for RotationOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationOrder::StageMajor => write!(f, "stage-major"),
            RotationOrder::NodeMajor => write!(f, "node-major"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationSettings {
    #[serde(default)]
    pub order: RotationOrder,
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_restart_command")]
    pub restart_command: String,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            order: RotationOrder::default(),
            health_timeout_secs: default_health_timeout(),
            health_interval_secs: default_health_interval(),
            restart_command: default_restart_command(),
        }
    }
}

impl RotationSettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_health_timeout() -> u64 {
    120
}

fn default_health_interval() -> u64 {
    10
}

fn default_restart_command() -> String {
    "systemctl restart kubelet".to_string()
}

impl RotationConfig {
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&config_str, path)
    }

    fn from_yaml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: RotationConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: origin.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace.trim().is_empty() {
            return Err(ConfigError::Invalid("workspace must not be empty".to_string()));
        }
        if self.ssh.user.trim().is_empty() {
            return Err(ConfigError::Invalid("ssh.user must not be empty".to_string()));
        }
        if let Some(key) = self.ssh_key_path() {
            if !key.exists() {
                return Err(ConfigError::Invalid(format!(
                    "SSH key not found at: {}",
                    self.ssh.key_path
                )));
            }
        }
        if self.certificates.ca_expiry_days == 0 || self.certificates.cert_expiry_days == 0 {
            return Err(ConfigError::Invalid(
                "certificate expiry days must be greater than zero".to_string(),
            ));
        }
        for subject in [
            &self.certificates.kubernetes_ca_subject,
            &self.certificates.etcd_ca_subject,
            &self.certificates.front_proxy_ca_subject,
        ] {
            parse_subject(subject).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.rotation.health_interval_secs == 0 || self.rotation.health_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "health interval and timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn workspace_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.workspace).to_string())
    }

    pub fn ssh_key_path(&self) -> Option<PathBuf> {
        if self.ssh.key_path.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(shellexpand::tilde(&self.ssh.key_path).to_string()))
        }
    }

    /// Explicit kubeconfig, else `~/.kube/config` when it exists, else
    /// whatever kubectl picks on its own.
    pub fn resolve_kubeconfig(&self) -> Option<PathBuf> {
        if !self.kubeconfig_path.trim().is_empty() {
            return Some(PathBuf::from(
                shellexpand::tilde(&self.kubeconfig_path).to_string(),
            ));
        }
        dirs::home_dir()
            .map(|home| home.join(".kube").join("config"))
            .filter(|path| Path::new(path).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
kubeconfigPath: /tmp/kubeconfig
workspace: /tmp/rotation
ssh:
  user: root
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = RotationConfig::from_yaml(MINIMAL, "inline").unwrap();

        assert_eq!(config.ssh.port, 22);
        assert!(!config.ssh.sudo);
        assert_eq!(config.remote_paths.kubernetes_dir, "/etc/kubernetes");
        assert_eq!(config.remote_paths.etcd_ssl_dir, "/etc/ssl/etcd/ssl");
        assert_eq!(config.certificates.ca_expiry_days, 3650);
        assert_eq!(config.rotation.order, RotationOrder::StageMajor);
        assert_eq!(config.rotation.health_interval(), Duration::from_secs(10));
        assert_eq!(config.rotation.restart_command, "systemctl restart kubelet");
        assert!(config.ssh_key_path().is_none());
        assert_eq!(
            config.resolve_kubeconfig(),
            Some(PathBuf::from("/tmp/kubeconfig"))
        );
    }

    #[test]
    fn parses_node_major_order() {
        let yaml = format!("{MINIMAL}rotation:\n  order: node-major\n");
        let config = RotationConfig::from_yaml(&yaml, "inline").unwrap();
        assert_eq!(config.rotation.order, RotationOrder::NodeMajor);
        assert_eq!(config.rotation.health_timeout_secs, 120);
    }

    #[test]
    fn rejects_missing_key_file() {
        let yaml = r#"
workspace: /tmp/rotation
ssh:
  user: root
  keyPath: /definitely/not/here/id_rsa
"#;
        let err = RotationConfig::from_yaml(yaml, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("SSH key not found")));
    }

    #[test]
    fn rejects_subject_without_common_name() {
        let yaml = format!("{MINIMAL}certificates:\n  caExpiryDays: 10\n  certExpiryDays: 5\n  kubernetesCaSubject: /O=acme\n  etcdCaSubject: /CN=etcd-ca\n  frontProxyCaSubject: /CN=front-proxy-ca\n");
        let err = RotationConfig::from_yaml(&yaml, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = RotationConfig::from_yaml("ssh: [", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
