use std::{fs, io, path::Path};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use tracing::debug;

use crate::cert::{
    certificate_subject, client_spec, generate_certificate, operations::write_private_file, CertError,
    CertificatePair,
};

#[derive(Debug, thiserror::Error)]
pub enum KubeconfigError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize kubeconfig: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("user {user}: {field} is not valid base64: {source}")]
    Base64 {
        user: String,
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("user {user}: {source}")]
    Credential {
        user: String,
        #[source]
        source: CertError,
    },
}

/// The parts of a kubeconfig a rotation rewrites. Every other key is kept
/// in `rest` and written back untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kubeconfig {
    pub clusters: Vec<NamedCluster>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<NamedUser>,
    #[serde(flatten)]
    pub rest: Mapping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
    #[serde(flatten)]
    pub rest: Mapping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(
        rename = "certificate-authority-data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub certificate_authority_data: Option<String>,
    #[serde(flatten)]
    pub rest: Mapping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: User,
    #[serde(flatten)]
    pub rest: Mapping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(
        rename = "client-certificate-data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_certificate_data: Option<String>,
    #[serde(
        rename = "client-key-data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_key_data: Option<String>,
    #[serde(flatten)]
    pub rest: Mapping,
}

impl Kubeconfig {
    /// `None` when `content` is not a kubeconfig (not YAML, or no clusters).
    pub fn parse(content: &str) -> Option<Self> {
        serde_yaml::from_str(content).ok()
    }

    pub fn to_yaml(&self) -> Result<String, KubeconfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Points every cluster at `ca_pem`, dropping any file-based
    /// `certificate-authority` that would conflict with the embedded data.
    pub fn set_certificate_authority(&mut self, ca_pem: &[u8]) {
        let encoded = STANDARD.encode(ca_pem);
        for named in &mut self.clusters {
            named.cluster.certificate_authority_data = Some(encoded.clone());
            named.cluster.rest.remove("certificate-authority");
        }
    }

    /// Replaces every embedded client certificate with one signed by `ca`
    /// that keeps the old certificate's CN and O.
    pub fn reissue_client_credentials(
        &mut self,
        ca: &CertificatePair,
        expiry_days: u32,
    ) -> Result<usize, KubeconfigError> {
        let mut reissued = 0;
        for named in &mut self.users {
            let Some(encoded) = named.user.client_certificate_data.as_deref() else {
                continue;
            };
            let old_cert = STANDARD
                .decode(encoded.trim())
                .map_err(|source| KubeconfigError::Base64 {
                    user: named.name.clone(),
                    field: "client-certificate-data",
                    source,
                })?;
            let credential = |source| KubeconfigError::Credential {
                user: named.name.clone(),
                source,
            };
            let subject = certificate_subject(&old_cert).map_err(credential)?;
            let pair = generate_certificate(&client_spec(subject, expiry_days), Some(ca))
                .map_err(credential)?;

            named.user.client_certificate_data = Some(STANDARD.encode(&pair.cert_pem));
            named.user.client_key_data = Some(STANDARD.encode(&pair.key_pem));
            reissued += 1;
        }
        Ok(reissued)
    }
}

fn read(path: &Path) -> Result<String, KubeconfigError> {
    fs::read_to_string(path).map_err(|source| KubeconfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Every kubeconfig copy holds client keys and is owner-only.
fn write(path: &Path, contents: &[u8]) -> Result<(), KubeconfigError> {
    write_private_file(path, contents).map_err(|source| KubeconfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn copy_unchanged(src: &Path, dst: &Path) -> Result<(), KubeconfigError> {
    let bytes = fs::read(src).map_err(|source| KubeconfigError::Io {
        path: src.display().to_string(),
        source,
    })?;
    write(dst, &bytes)
}

/// Writes `src` to `dst` with every cluster trusting `ca_pem`. Files that are
/// not kubeconfigs are copied as they are. Returns whether `src` was
/// rewritten.
pub fn rewrite_ca(src: &Path, dst: &Path, ca_pem: &[u8]) -> Result<bool, KubeconfigError> {
    let content = read(src)?;
    let Some(mut config) = Kubeconfig::parse(&content) else {
        debug!(path = %src.display(), "not a kubeconfig, copying unchanged");
        copy_unchanged(src, dst)?;
        return Ok(false);
    };
    config.set_certificate_authority(ca_pem);
    write(dst, config.to_yaml()?.as_bytes())?;
    Ok(true)
}

/// Writes the post-rotation form of `src` to `dst`: new CA only and client
/// credentials re-issued by it.
pub fn reissue(
    src: &Path,
    dst: &Path,
    ca: &CertificatePair,
    expiry_days: u32,
) -> Result<bool, KubeconfigError> {
    let content = read(src)?;
    let Some(mut config) = Kubeconfig::parse(&content) else {
        copy_unchanged(src, dst)?;
        return Ok(false);
    };
    config.set_certificate_authority(&ca.cert_pem);
    let count = config.reissue_client_credentials(ca, expiry_days)?;
    debug!(path = %src.display(), credentials = count, "re-issued kubeconfig");
    write(dst, config.to_yaml()?.as_bytes())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{generate_ca, is_signed_by, parse_subject, CertSpec, ExtendedKeyUsage};

    fn admin_conf(ca: &CertificatePair) -> String {
        let spec = CertSpec::leaf(parse_subject("/CN=kubernetes-admin/O=system:masters").unwrap(), 5)
            .with_usage(&[ExtendedKeyUsage::ClientAuth]);
        let client = generate_certificate(&spec, Some(ca)).unwrap();
        format!(
            r#"apiVersion: v1
kind: Config
current-context: kubernetes-admin@kubernetes
clusters:
- name: kubernetes
  cluster:
    server: https://10.0.0.1:6443
    certificate-authority-data: {}
contexts:
- name: kubernetes-admin@kubernetes
  context:
    cluster: kubernetes
    user: kubernetes-admin
users:
- name: kubernetes-admin
  user:
    client-certificate-data: {}
    client-key-data: {}
"#,
            STANDARD.encode(&ca.cert_pem),
            STANDARD.encode(&client.cert_pem),
            STANDARD.encode(&client.key_pem),
        )
    }

    #[test]
    fn rewrite_ca_keeps_unrelated_fields() {
        let old_ca = generate_ca("/CN=kubernetes", 5).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("admin.conf");
        let dst = dir.path().join("out/admin.conf");
        fs::write(&src, admin_conf(&old_ca)).unwrap();

        let bundle = b"OLD\nNEW\n";
        assert!(rewrite_ca(&src, &dst, bundle).unwrap());

        let rewritten = Kubeconfig::parse(&fs::read_to_string(&dst).unwrap()).unwrap();
        let data = rewritten.clusters[0].cluster.certificate_authority_data.as_deref().unwrap();
        assert_eq!(STANDARD.decode(data).unwrap(), bundle);
        assert_eq!(
            rewritten.clusters[0].cluster.rest.get("server").and_then(|v| v.as_str()),
            Some("https://10.0.0.1:6443")
        );
        assert_eq!(
            rewritten.rest.get("current-context").and_then(|v| v.as_str()),
            Some("kubernetes-admin@kubernetes")
        );
        assert!(rewritten.rest.get("contexts").is_some());
    }

    #[test]
    fn non_kubeconfig_files_are_copied() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("kubeadm.conf");
        let dst = dir.path().join("copy.conf");
        fs::write(&src, "[Service]\nEnvironment=foo\n").unwrap();

        assert!(!rewrite_ca(&src, &dst, b"CA").unwrap());
        assert_eq!(fs::read(&src).unwrap(), fs::read(&dst).unwrap());
    }

    #[test]
    fn reissue_signs_credentials_with_new_ca() {
        let old_ca = generate_ca("/CN=kubernetes", 5).unwrap();
        let new_ca = generate_ca("/CN=kubernetes", 5).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("admin.conf");
        let dst = dir.path().join("new/admin.conf");
        fs::write(&src, admin_conf(&old_ca)).unwrap();

        assert!(reissue(&src, &dst, &new_ca, 5).unwrap());

        let config = Kubeconfig::parse(&fs::read_to_string(&dst).unwrap()).unwrap();
        let ca_data = config.clusters[0].cluster.certificate_authority_data.as_deref().unwrap();
        assert_eq!(STANDARD.decode(ca_data).unwrap(), new_ca.cert_pem);

        let user = &config.users[0].user;
        let cert = STANDARD
            .decode(user.client_certificate_data.as_deref().unwrap())
            .unwrap();
        assert!(is_signed_by(&cert, &new_ca.cert_pem).unwrap());
        assert!(!is_signed_by(&cert, &old_ca.cert_pem).unwrap());

        let subject = certificate_subject(&cert).unwrap();
        assert_eq!(subject.common_name, "kubernetes-admin");
        assert_eq!(subject.organization, vec!["system:masters".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn rewritten_and_reissued_kubeconfigs_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let old_ca = generate_ca("/CN=kubernetes", 5).unwrap();
        let new_ca = generate_ca("/CN=kubernetes", 5).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("admin.conf");
        fs::write(&src, admin_conf(&old_ca)).unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o644)).unwrap();

        let bundled = dir.path().join("bundle/admin.conf");
        let reissued = dir.path().join("new/admin.conf");
        rewrite_ca(&src, &bundled, &old_ca.cert_pem).unwrap();
        reissue(&src, &reissued, &new_ca, 5).unwrap();

        for path in [bundled, reissued] {
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600, "{}", path.display());
        }
    }
}
