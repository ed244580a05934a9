// src/app/testing.rs
//
// In-memory cluster and SSH doubles shared by the unit tests.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::{
    cert::{
        api_server_spec, client_spec, generate_ca, generate_certificate, operations::write_file,
        parse_subject, San,
    },
    config::{RemotePaths, RotationConfig, RotationOrder},
    discovery::{
        ClusterApi, KubeError, NodeAddress, NodeCondition, NodeObject, NodeStatus, ObjectMeta,
        PodObject, PodSpec,
    },
    remote::{Connector, RemoteError, Runner, ScpError},
    types::Node,
};

pub fn master(name: &str, ip: &str) -> NodeObject {
    NodeObject {
        metadata: ObjectMeta {
            name: name.to_string(),
        },
        status: NodeStatus {
            addresses: vec![
                NodeAddress {
                    kind: "Hostname".to_string(),
                    address: name.to_string(),
                },
                NodeAddress {
                    kind: "InternalIP".to_string(),
                    address: ip.to_string(),
                },
            ],
            conditions: vec![NodeCondition {
                kind: "Ready".to_string(),
                status: "True".to_string(),
                reason: Some("KubeletReady".to_string()),
            }],
        },
    }
}

pub fn etcd_pod(node: &str) -> PodObject {
    PodObject {
        metadata: ObjectMeta {
            name: format!("etcd-{}", node),
        },
        spec: PodSpec {
            node_name: Some(node.to_string()),
        },
    }
}

pub fn test_config(workspace: &Path, order: RotationOrder) -> RotationConfig {
    let yaml = format!(
        "workspace: {}\nssh:\n  user: root\ncertificates:\n  caExpiryDays: 30\n  certExpiryDays: 10\n  kubernetesCaSubject: /CN=kubernetes\n  etcdCaSubject: /CN=etcd-ca\n  frontProxyCaSubject: /CN=front-proxy-ca\nrotation:\n  order: {}\n",
        workspace.display(),
        order
    );
    let config: RotationConfig = serde_yaml::from_str(&yaml).unwrap();
    config.validate().unwrap();
    config
}

#[derive(Debug, Clone, Copy)]
enum Readiness {
    After(usize),
    FailFirst(usize),
    Never,
}

/// A [`ClusterApi`] over fixed node and pod lists. Readiness answers can be
/// scripted per node; every `node_ready` call is counted.
#[derive(Default)]
pub struct FakeCluster {
    nodes: Vec<NodeObject>,
    pods: Vec<PodObject>,
    readiness: HashMap<String, Readiness>,
    polls: Mutex<HashMap<String, usize>>,
}

impl FakeCluster {
    pub fn new(nodes: Vec<NodeObject>, pods: Vec<PodObject>) -> Self {
        Self {
            nodes,
            pods,
            ..Self::default()
        }
    }

    /// Not Ready for the first `n` polls.
    pub fn ready_after(mut self, node: &str, n: usize) -> Self {
        self.readiness.insert(node.to_string(), Readiness::After(n));
        self
    }

    /// The first `n` polls fail outright.
    pub fn failing_polls(mut self, node: &str, n: usize) -> Self {
        self.readiness.insert(node.to_string(), Readiness::FailFirst(n));
        self
    }

    pub fn never_ready(mut self, node: &str) -> Self {
        self.readiness.insert(node.to_string(), Readiness::Never);
        self
    }

    pub fn polls(&self, node: &str) -> usize {
        self.polls.lock().unwrap().get(node).copied().unwrap_or(0)
    }
}

impl ClusterApi for FakeCluster {
    async fn server_version(&self) -> Result<String, KubeError> {
        Ok("v1.29.3".to_string())
    }

    async fn list_nodes(&self, _label_selector: &str) -> Result<Vec<NodeObject>, KubeError> {
        Ok(self.nodes.clone())
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        _label_selector: &str,
    ) -> Result<Vec<PodObject>, KubeError> {
        Ok(self.pods.clone())
    }

    async fn node_ready(&self, name: &str) -> Result<bool, KubeError> {
        let seen = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        match self.readiness.get(name).copied() {
            Some(Readiness::After(n)) => Ok(seen > n),
            Some(Readiness::FailFirst(n)) if seen <= n => Err(KubeError::Command {
                args: format!("get node {}", name),
                status: 1,
                stderr: "connection refused".to_string(),
            }),
            Some(Readiness::FailFirst(_)) => Ok(true),
            Some(Readiness::Never) => Ok(false),
            None => Ok(self
                .nodes
                .iter()
                .find(|n| n.metadata.name == name)
                .is_some_and(NodeObject::is_ready)),
        }
    }
}

/// One observed [`Runner`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Run(String),
    Upload { remote: String, contents: Vec<u8> },
    Download(String),
    Close,
}

#[derive(Default)]
struct Recorded {
    calls: Vec<(String, Call)>,
    files: BTreeMap<(String, String), Vec<u8>>,
}

/// A [`Connector`] whose nodes are in-memory file systems. Every call is
/// recorded in order across all nodes.
#[derive(Default, Clone)]
pub struct RecordingConnector {
    state: Arc<Mutex<Recorded>>,
    unreachable: HashSet<String>,
    failing_uploads: HashSet<String>,
    failing_downloads: HashSet<(String, String)>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(mut self, node: &str) -> Self {
        self.unreachable.insert(node.to_string());
        self
    }

    pub fn failing_uploads(mut self, node: &str) -> Self {
        self.failing_uploads.insert(node.to_string());
        self
    }

    /// Downloads on `node` of any path ending in `suffix` fail.
    pub fn failing_download(mut self, node: &str, suffix: &str) -> Self {
        self.failing_downloads
            .insert((node.to_string(), suffix.to_string()));
        self
    }

    pub fn put_file(&self, node: &str, remote: &str, contents: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert((node.to_string(), remote.to_string()), contents.into());
    }

    pub fn file(&self, node: &str, remote: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&(node.to_string(), remote.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> Vec<(String, Call)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, node: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|(n, _)| n == node)
            .map(|(_, c)| c)
            .collect()
    }

    pub fn commands_for(&self, node: &str) -> Vec<String> {
        self.calls_for(node)
            .into_iter()
            .filter_map(|c| match c {
                Call::Run(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn uploads_for(&self, node: &str) -> Vec<String> {
        self.calls_for(node)
            .into_iter()
            .filter_map(|c| match c {
                Call::Upload { remote, .. } => Some(remote),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.calls()
            .iter()
            .filter(|(_, c)| *c == Call::Connect)
            .count()
    }

    pub fn closes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|(_, c)| *c == Call::Close)
            .count()
    }
}

impl Connector for RecordingConnector {
    fn connect(&self, node: &Node) -> Result<Box<dyn Runner>, RemoteError> {
        if self.unreachable.contains(&node.name) {
            return Err(RemoteError::Connect {
                host: node.internal_ip.clone(),
                message: "connection refused".to_string(),
            });
        }
        let runner = RecordingRunner {
            node: node.name.clone(),
            host: node.internal_ip.clone(),
            connector: self.clone(),
        };
        runner.record(Call::Connect);
        Ok(Box::new(runner))
    }
}

struct RecordingRunner {
    node: String,
    host: String,
    connector: RecordingConnector,
}

impl RecordingRunner {
    fn record(&self, call: Call) {
        self.connector
            .state
            .lock()
            .unwrap()
            .calls
            .push((self.node.clone(), call));
    }

    // `[sudo -n ]find '<root>' -type f`
    fn list(&self, command: &str) -> String {
        let root = command.split('\'').nth(1).unwrap_or_default();
        let prefix = format!("{}/", root);
        let state = self.connector.state.lock().unwrap();
        state
            .files
            .keys()
            .filter(|(node, path)| *node == self.node && path.starts_with(&prefix))
            .map(|(_, path)| path.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Runner for RecordingRunner {
    fn run(&mut self, command: &str) -> Result<String, RemoteError> {
        self.record(Call::Run(command.to_string()));
        if command.contains("find ") {
            return Ok(self.list(command));
        }
        if command == "hostname" {
            return Ok(self.node.clone());
        }
        Ok(String::new())
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        if self.connector.failing_uploads.contains(&self.node) {
            return Err(RemoteError::Transfer {
                host: self.host.clone(),
                path: remote.to_string(),
                source: ScpError::Remote("Permission denied".to_string()),
            });
        }
        let contents = fs::read(local).map_err(|source| RemoteError::LocalIo {
            path: local.display().to_string(),
            source,
        })?;
        self.connector.put_file(&self.node, remote, contents.clone());
        self.record(Call::Upload {
            remote: remote.to_string(),
            contents,
        });
        Ok(())
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.record(Call::Download(remote.to_string()));
        if self
            .connector
            .failing_downloads
            .iter()
            .any(|(node, suffix)| *node == self.node && remote.ends_with(suffix.as_str()))
        {
            return Err(RemoteError::Transfer {
                host: self.host.clone(),
                path: remote.to_string(),
                source: ScpError::Remote("Permission denied".to_string()),
            });
        }
        let contents = self.connector.file(&self.node, remote).ok_or_else(|| {
            RemoteError::Transfer {
                host: self.host.clone(),
                path: remote.to_string(),
                source: ScpError::Remote(format!("{}: No such file or directory", remote)),
            }
        })?;
        write_file(local, &contents).map_err(|source| RemoteError::LocalIo {
            path: local.display().to_string(),
            source,
        })
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        self.record(Call::Close);
        Ok(())
    }
}

/// Pre-rotation trust material shared by every node of a fake fleet.
pub struct OldPki {
    pub kubernetes_ca: crate::cert::CertificatePair,
    pub front_proxy_ca: crate::cert::CertificatePair,
    pub etcd_ca: crate::cert::CertificatePair,
}

impl OldPki {
    pub fn generate() -> Self {
        Self {
            kubernetes_ca: generate_ca("/CN=kubernetes", 30).unwrap(),
            front_proxy_ca: generate_ca("/CN=front-proxy-ca", 30).unwrap(),
            etcd_ca: generate_ca("/CN=etcd-ca", 30).unwrap(),
        }
    }

    /// Lays out a kubeadm-style control plane on `node`.
    pub fn seed(&self, connector: &RecordingConnector, node: &str, ip: &str, is_etcd: bool) {
        let paths = RemotePaths::default();
        let k8s = |rel: &str| format!("{}/{}", paths.kubernetes_dir, rel);
        let sans = San::parse_all(["localhost", "kubernetes", node, "127.0.0.1", ip]);
        let apiserver =
            generate_certificate(&api_server_spec(&sans, 10), Some(&self.kubernetes_ca)).unwrap();
        connector.put_file(node, &k8s("pki/ca.crt"), self.kubernetes_ca.cert_pem.clone());
        connector.put_file(node, &k8s("pki/ca.key"), self.kubernetes_ca.key_pem.clone());
        connector.put_file(node, &k8s("pki/front-proxy-ca.crt"), self.front_proxy_ca.cert_pem.clone());
        connector.put_file(node, &k8s("pki/front-proxy-ca.key"), self.front_proxy_ca.key_pem.clone());
        connector.put_file(node, &k8s("pki/apiserver.crt"), apiserver.cert_pem);
        connector.put_file(node, &k8s("pki/apiserver.key"), apiserver.key_pem);
        connector.put_file(node, &k8s("pki/sa.pub"), "old sa pub\n");
        connector.put_file(node, &k8s("manifests/kube-apiserver.yaml"), "kind: Pod\n");
        for (file, subject) in [
            ("admin.conf", "/CN=kubernetes-admin/O=system:masters"),
            ("controller-manager.conf", "/CN=system:kube-controller-manager"),
            ("scheduler.conf", "/CN=system:kube-scheduler"),
            ("kubelet.conf", "/CN=system:node:{node}/O=system:nodes"),
        ] {
            let subject = subject.replace("{node}", node);
            let client = generate_certificate(
                &client_spec(parse_subject(&subject).unwrap(), 10),
                Some(&self.kubernetes_ca),
            )
            .unwrap();
            connector.put_file(
                node,
                &k8s(file),
                format!(
                    "apiVersion: v1\nkind: Config\nclusters:\n- name: kubernetes\n  cluster:\n    server: https://{}:6443\n    certificate-authority-data: {}\nusers:\n- name: client\n  user:\n    client-certificate-data: {}\n    client-key-data: {}\n",
                    ip,
                    STANDARD.encode(&self.kubernetes_ca.cert_pem),
                    STANDARD.encode(&client.cert_pem),
                    STANDARD.encode(&client.key_pem),
                ),
            );
        }

        if is_etcd {
            let etcd = |rel: &str| format!("{}/{}", paths.etcd_ssl_dir, rel);
            connector.put_file(node, &etcd("ca.pem"), self.etcd_ca.cert_pem.clone());
            connector.put_file(node, &etcd("ca-key.pem"), self.etcd_ca.key_pem.clone());
            connector.put_file(node, &etcd(&format!("member-{}.pem", node)), "old member\n");
        }
    }
}
