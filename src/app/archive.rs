// src/app/archive.rs
//
// Local layout:
//   <workspace>/run.json
//   <workspace>/{k8s-bundle.crt,etcd-bundle.pem,front-proxy-bundle.crt}
//   <workspace>/new-cas/{kubernetes,etcd,front-proxy}/...
//   <workspace>/<node>/{old,new,bundle}/{kubernetes,etcd-ssl}/...
use std::{
    fmt, fs, io,
    path::{Component, Path, PathBuf},
};

use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::{config::RemotePaths, types::ClusterTopology};

pub const KUBERNETES_DIR: &str = "kubernetes";
pub const ETCD_SSL_DIR: &str = "etcd-ssl";
pub const MANIFEST_FILE: &str = "run.json";
pub const K8S_BUNDLE: &str = "k8s-bundle.crt";
pub const ETCD_BUNDLE: &str = "etcd-bundle.pem";
pub const FRONT_PROXY_BUNDLE: &str = "front-proxy-bundle.crt";
pub const NEW_CAS_DIR: &str = "new-cas";

/// Kubernetes CA, front-proxy CA and etcd CA files, relative to a phase dir.
pub const K8S_CA_CERT: &str = "kubernetes/pki/ca.crt";
pub const K8S_CA_KEY: &str = "kubernetes/pki/ca.key";
pub const FRONT_PROXY_CA_CERT: &str = "kubernetes/pki/front-proxy-ca.crt";
pub const FRONT_PROXY_CA_KEY: &str = "kubernetes/pki/front-proxy-ca.key";
pub const APISERVER_CERT: &str = "kubernetes/pki/apiserver.crt";
pub const ETCD_CA_CERT: &str = "etcd-ssl/ca.pem";
pub const ETCD_CA_KEY: &str = "etcd-ssl/ca-key.pem";

/// Kubeconfigs kubeadm writes on every control-plane node.
pub const STANDARD_KUBECONFIGS: [&str; 4] = [
    "kubernetes/admin.conf",
    "kubernetes/controller-manager.conf",
    "kubernetes/scheduler.conf",
    "kubernetes/kubelet.conf",
];

pub const CA_FILES: [&str; 6] = [
    K8S_CA_CERT,
    K8S_CA_KEY,
    FRONT_PROXY_CA_CERT,
    FRONT_PROXY_CA_KEY,
    ETCD_CA_CERT,
    ETCD_CA_KEY,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Old,
    New,
    Bundle,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Old => "old",
            Phase::New => "new",
            Phase::Bundle => "bundle",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files Prepare cannot do without, relative to `old/`.
pub fn required_files(is_etcd: bool) -> Vec<&'static str> {
    let mut files = vec![
        K8S_CA_CERT,
        K8S_CA_KEY,
        APISERVER_CERT,
        FRONT_PROXY_CA_CERT,
        FRONT_PROXY_CA_KEY,
    ];
    if is_etcd {
        files.extend([ETCD_CA_CERT, ETCD_CA_KEY]);
    }
    files
}

pub fn is_ca_file(relative: &Path) -> bool {
    CA_FILES.iter().any(|ca| relative == Path::new(ca))
}

pub fn is_kubeconfig(relative: &Path) -> bool {
    relative.extension().is_some_and(|ext| ext == "conf")
}

/// Old trust first, then new. A separating newline is added only when the
/// old bytes do not already end with one.
pub fn concat_bundle(old: &[u8], new: &[u8]) -> Vec<u8> {
    let mut bundle = Vec::with_capacity(old.len() + new.len() + 1);
    bundle.extend_from_slice(old);
    if !old.is_empty() && !old.ends_with(b"\n") {
        bundle.push(b'\n');
    }
    bundle.extend_from_slice(new);
    bundle
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaFingerprints {
    pub kubernetes: String,
    pub etcd: String,
    pub front_proxy: String,
}

/// Summary of a Prepare, written beside the node trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub topology: ClusterTopology,
    pub new_ca_fingerprints: CaFingerprints,
}

/// Maps between the local backup tree and the live remote paths.
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
    remote: RemotePaths,
}

impl Archive {
    pub fn new(root: PathBuf, remote: RemotePaths) -> Self {
        Self { root, remote }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn phase_dir(&self, node: &str, phase: Phase) -> PathBuf {
        self.root.join(node).join(phase.as_str())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn new_cas_dir(&self) -> PathBuf {
        self.root.join(NEW_CAS_DIR)
    }

    pub fn load_manifest(&self) -> io::Result<RunManifest> {
        let raw = fs::read(self.manifest_path())?;
        serde_json::from_slice(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn save_manifest(&self, manifest: &RunManifest) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let json = serde_json::to_vec_pretty(manifest)?;
        fs::write(self.manifest_path(), json)
    }

    /// `kubernetes/...` lives under the Kubernetes dir, `etcd-ssl/...`
    /// under the etcd SSL dir. Anything else has no remote home.
    pub fn remote_path(&self, relative: &Path) -> Option<String> {
        let mut components = relative.components();
        let top = match components.next()? {
            Component::Normal(top) => top.to_str()?,
            _ => return None,
        };
        let base = match top {
            KUBERNETES_DIR => &self.remote.kubernetes_dir,
            ETCD_SSL_DIR => &self.remote.etcd_ssl_dir,
            _ => return None,
        };
        let rest = components.as_path();
        if rest.as_os_str().is_empty()
            || rest.components().any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            rest.to_string_lossy()
        ))
    }

    /// Inverse of [`Archive::remote_path`].
    pub fn local_relative(&self, remote: &str) -> Option<PathBuf> {
        for (top, base) in [
            (KUBERNETES_DIR, &self.remote.kubernetes_dir),
            (ETCD_SSL_DIR, &self.remote.etcd_ssl_dir),
        ] {
            let prefix = format!("{}/", base.trim_end_matches('/'));
            if let Some(rest) = remote.strip_prefix(&prefix) {
                if rest.is_empty() || rest.split('/').any(|s| s.is_empty() || s == "..") {
                    return None;
                }
                return Some(Path::new(top).join(rest));
            }
        }
        None
    }

    /// Every regular file under `dir`, relative to it, sorted.
    pub fn files_under(dir: &Path) -> io::Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = format!("{}/**/*", Pattern::escape(&dir.to_string_lossy()));
        let entries =
            glob::glob(&pattern).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| e.into_error())?;
            if path.is_file() {
                if let Ok(relative) = path.strip_prefix(dir) {
                    files.push(relative.to_path_buf());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn phase_files(&self, node: &str, phase: Phase) -> io::Result<Vec<PathBuf>> {
        Self::files_under(&self.phase_dir(node, phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(root: &Path) -> Archive {
        Archive::new(root.to_path_buf(), RemotePaths::default())
    }

    #[test]
    fn maps_local_and_remote_paths_both_ways() {
        let a = archive(Path::new("/ws"));

        assert_eq!(
            a.remote_path(Path::new("kubernetes/pki/ca.crt")).as_deref(),
            Some("/etc/kubernetes/pki/ca.crt")
        );
        assert_eq!(
            a.remote_path(Path::new("etcd-ssl/member-m1.pem")).as_deref(),
            Some("/etc/ssl/etcd/ssl/member-m1.pem")
        );
        assert_eq!(a.remote_path(Path::new("elsewhere/x")), None);
        assert_eq!(a.remote_path(Path::new("kubernetes/../x")), None);

        assert_eq!(
            a.local_relative("/etc/kubernetes/admin.conf"),
            Some(PathBuf::from("kubernetes/admin.conf"))
        );
        assert_eq!(
            a.local_relative("/etc/ssl/etcd/ssl/ca.pem"),
            Some(PathBuf::from("etcd-ssl/ca.pem"))
        );
        assert_eq!(a.local_relative("/etc/kubernetesx/ca.crt"), None);
        assert_eq!(a.local_relative("/etc/kubernetes/../shadow"), None);
    }

    #[test]
    fn bundle_separator_only_when_needed() {
        assert_eq!(concat_bundle(b"OLD\n", b"NEW\n"), b"OLD\nNEW\n");
        assert_eq!(concat_bundle(b"OLD", b"NEW\n"), b"OLD\nNEW\n");
        assert_eq!(concat_bundle(b"", b"NEW\n"), b"NEW\n");
    }

    #[test]
    fn lists_nested_files_relative_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive(dir.path());
        let old = a.phase_dir("m1", Phase::Old);
        fs::create_dir_all(old.join("kubernetes/pki/etcd")).unwrap();
        fs::create_dir_all(old.join("etcd-ssl")).unwrap();
        fs::write(old.join("kubernetes/pki/ca.crt"), "x").unwrap();
        fs::write(old.join("kubernetes/pki/etcd/ca.crt"), "x").unwrap();
        fs::write(old.join("etcd-ssl/ca.pem"), "x").unwrap();

        let files = a.phase_files("m1", Phase::Old).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("etcd-ssl/ca.pem"),
                PathBuf::from("kubernetes/pki/ca.crt"),
                PathBuf::from("kubernetes/pki/etcd/ca.crt"),
            ]
        );
        assert!(a.phase_files("m1", Phase::New).unwrap().is_empty());
    }

    #[test]
    fn classifies_ca_and_kubeconfig_files() {
        assert!(is_ca_file(Path::new("etcd-ssl/ca-key.pem")));
        assert!(!is_ca_file(Path::new("kubernetes/pki/apiserver.crt")));
        assert!(is_kubeconfig(Path::new("kubernetes/admin.conf")));
        assert!(!is_kubeconfig(Path::new("kubernetes/pki/sa.pub")));
        assert_eq!(required_files(true).len(), 7);
    }
}
