// src/discovery/kubectl.rs
use std::{future::Future, io, path::PathBuf, process::Stdio, time::Duration};

use serde::{de::DeserializeOwned, Deserialize};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum KubeError {
    #[error("failed to run kubectl: {0}")]
    Spawn(#[source] io::Error),

    #[error("kubectl {args} exited with {status}: {stderr}")]
    Command {
        args: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to decode kubectl output for {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("API server did not report a version")]
    NoServerVersion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl NodeObject {
    pub fn internal_ip(&self) -> Option<&str> {
        self.status
            .addresses
            .iter()
            .find(|a| a.kind == "InternalIP" && !a.address.is_empty())
            .map(|a| a.address.as_str())
    }

    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub node_name: Option<String>,
}

#[derive(Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionOutput {
    server_version: Option<ServerVersion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerVersion {
    git_version: String,
}

/// The slice of the Kubernetes API a rotation needs.
pub trait ClusterApi: Send + Sync {
    fn server_version(&self) -> impl Future<Output = Result<String, KubeError>> + Send;

    fn list_nodes(
        &self,
        label_selector: &str,
    ) -> impl Future<Output = Result<Vec<NodeObject>, KubeError>> + Send;

    fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> impl Future<Output = Result<Vec<PodObject>, KubeError>> + Send;

    fn node_ready(&self, name: &str) -> impl Future<Output = Result<bool, KubeError>> + Send;
}

/// [`ClusterApi`] backed by the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct Kubectl {
    kubeconfig: Option<PathBuf>,
    request_timeout: Duration,
}

impl Kubectl {
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self {
            kubeconfig,
            request_timeout: Duration::from_secs(10),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, KubeError> {
        let mut cmd = Command::new("kubectl");
        if let Some(path) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(path);
        }
        cmd.arg(format!("--request-timeout={}s", self.request_timeout.as_secs()))
            .args(args)
            .args(["-o", "json"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(?args, "kubectl");
        let output = cmd.output().await.map_err(KubeError::Spawn)?;
        if !output.status.success() {
            return Err(KubeError::Command {
                args: args.join(" "),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        serde_json::from_slice(&output.stdout).map_err(|source| KubeError::Decode {
            what: args.join(" "),
            source,
        })
    }
}

impl ClusterApi for Kubectl {
    async fn server_version(&self) -> Result<String, KubeError> {
        let version: VersionOutput = self.get_json(&["version"]).await?;
        version
            .server_version
            .map(|v| v.git_version)
            .ok_or(KubeError::NoServerVersion)
    }

    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<NodeObject>, KubeError> {
        let list: ObjectList<NodeObject> = self
            .get_json(&["get", "nodes", "-l", label_selector])
            .await?;
        Ok(list.items)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodObject>, KubeError> {
        let list: ObjectList<PodObject> = self
            .get_json(&["get", "pods", "-n", namespace, "-l", label_selector])
            .await?;
        Ok(list.items)
    }

    async fn node_ready(&self, name: &str) -> Result<bool, KubeError> {
        let node: NodeObject = self.get_json(&["get", "node", name]).await?;
        if let Some(cond) = node.status.conditions.iter().find(|c| c.kind == "Ready") {
            debug!(node = name, status = %cond.status, reason = ?cond.reason, "Ready condition");
        }
        Ok(node.is_ready())
    }
}
