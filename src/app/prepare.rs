// src/app/prepare.rs
use std::{
    collections::BTreeSet,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    archive::{
        concat_bundle, is_kubeconfig, required_files, Archive, CaFingerprints, Phase, RunManifest,
        APISERVER_CERT, ETCD_BUNDLE, ETCD_CA_CERT, ETCD_SSL_DIR, FRONT_PROXY_BUNDLE,
        FRONT_PROXY_CA_CERT, K8S_BUNDLE, K8S_CA_CERT, KUBERNETES_DIR, STANDARD_KUBECONFIGS,
    },
    manager::{workspace_err, MissingFiles, NodeFailure, Orchestrator, RotationError},
};
use crate::{
    cert::{
        api_server_spec, default_api_server_sans, etcd_sans, extract_sans, fingerprint_sha256,
        front_proxy_client_spec, generate_authorities, generate_service_account_key_pair,
        kubelet_client_spec,
        operations::{generate_and_write, write_file, write_pair, write_private_file},
        EtcdRole, NewAuthorities, San, ServiceAccountKeyPair,
    },
    discovery::ClusterApi,
    kubeconfig,
    remote::{privileged, shell_quote, with_runner, Connector, RemoteError},
    types::{ClusterTopology, Node},
};

/// Outcome of one node's backup session.
#[derive(Debug, Default)]
struct NodeBackup {
    fetched: usize,
    failed: Vec<String>,
}

/// Everything generated once per run and shared by every node's `new/` tree.
struct Material {
    authorities: NewAuthorities,
    service_account: ServiceAccountKeyPair,
    api_server_sans: Vec<San>,
    etcd_sans: Vec<San>,
}

impl<A, C> Orchestrator<A, C>
where
    A: ClusterApi + 'static,
    C: Connector + 'static,
{
    /// Backs up every node, generates the new authorities and leaves,
    /// and lays out `old/`, `new/` and `bundle/` per node. Nothing on the
    /// nodes is modified.
    pub async fn prepare(&self, topology: &ClusterTopology) -> Result<RunManifest, RotationError> {
        let topology = topology.clone();
        self.blocking(move |this| this.prepare_blocking(&topology))
            .await
    }

    fn prepare_blocking(&self, topology: &ClusterTopology) -> Result<RunManifest, RotationError> {
        let started_at = Utc::now();
        self.claim_workspace(topology)?;

        self.backup_all(topology)?;

        let material = Material {
            api_server_sans: self.api_server_sans(topology)?,
            etcd_sans: etcd_sans(
                topology
                    .etcd_nodes
                    .iter()
                    .map(|n| (n.name.as_str(), n.internal_ip.as_str())),
            ),
            authorities: generate_authorities(&self.config.certificates)?,
            service_account: generate_service_account_key_pair()?,
        };
        self.write_new_cas(&material.authorities)?;

        for node in topology.all_nodes() {
            let is_etcd = topology.is_etcd(&node.name);
            self.build_new_tree(node, is_etcd, &material)?;
            self.build_bundle_tree(node, is_etcd, &material.authorities)?;
        }
        self.write_top_level_bundles(topology, &material.authorities)?;

        let authorities = &material.authorities;
        let manifest = RunManifest {
            started_at,
            dry_run: self.dry_run,
            topology: topology.clone(),
            new_ca_fingerprints: CaFingerprints {
                kubernetes: fingerprint_sha256(&authorities.kubernetes.cert_pem)?,
                etcd: fingerprint_sha256(&authorities.etcd.cert_pem)?,
                front_proxy: fingerprint_sha256(&authorities.front_proxy.cert_pem)?,
            },
        };
        self.archive
            .save_manifest(&manifest)
            .map_err(workspace_err(self.archive.manifest_path()))?;
        info!(
            workspace = %self.archive.root().display(),
            kubernetes_ca = %manifest.new_ca_fingerprints.kubernetes,
            "prepare complete"
        );
        Ok(manifest)
    }

    /// A workspace that holds a live run is kept for rollback. Leftovers of
    /// a dry run or an unfinished prepare are cleared.
    fn claim_workspace(&self, topology: &ClusterTopology) -> Result<(), RotationError> {
        let mut stale: BTreeSet<String> =
            topology.all_nodes().iter().map(|n| n.name.clone()).collect();

        match self.archive.load_manifest() {
            Ok(previous) if !previous.dry_run => {
                return Err(RotationError::WorkspaceInUse {
                    path: self.archive.root().to_path_buf(),
                });
            }
            Ok(previous) => {
                info!("replacing the results of an earlier dry run");
                stale.extend(previous.topology.all_nodes().iter().map(|n| n.name.clone()));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(RotationError::Workspace {
                    path: self.archive.manifest_path(),
                    source,
                })
            }
        }

        let mut dirs: Vec<PathBuf> = stale.iter().map(|n| self.archive.root().join(n)).collect();
        dirs.push(self.archive.new_cas_dir());
        for dir in dirs.into_iter().filter(|d| d.exists()) {
            debug!(path = %dir.display(), "clearing stale workspace directory");
            fs::remove_dir_all(&dir).map_err(workspace_err(&dir))?;
        }
        Ok(())
    }

    /// Downloads every node before judging the result, so one report names
    /// every node with gaps. A file that failed to download is a gap even
    /// when it is not one of the required files.
    fn backup_all(&self, topology: &ClusterTopology) -> Result<(), RotationError> {
        let mut missing = Vec::new();
        let mut failures = Vec::new();
        for node in topology.all_nodes() {
            let is_etcd = topology.is_etcd(&node.name);
            let mut files = BTreeSet::new();
            match self.backup_node(node, is_etcd) {
                Ok(backup) if backup.failed.is_empty() => {
                    info!(node = %node.name, files = backup.fetched, "backed up node")
                }
                Ok(backup) => {
                    warn!(
                        node = %node.name,
                        fetched = backup.fetched,
                        failed = backup.failed.len(),
                        "some files could not be backed up"
                    );
                    files.extend(backup.failed);
                }
                Err(e) => {
                    warn!(node = %node.name, error = %e, "backup failed, continuing with remaining nodes");
                    failures.push(NodeFailure {
                        node: node.name.clone(),
                        error: e,
                    });
                }
            }

            let old = self.archive.phase_dir(&node.name, Phase::Old);
            files.extend(
                required_files(is_etcd)
                    .into_iter()
                    .filter(|f| !old.join(f).is_file())
                    .map(String::from),
            );
            if !files.is_empty() {
                missing.push(MissingFiles {
                    node: node.name.clone(),
                    files: files.into_iter().collect(),
                });
            }
        }

        if missing.is_empty() && failures.is_empty() {
            Ok(())
        } else {
            Err(RotationError::IncompleteBackup { missing, failures })
        }
    }

    /// Lists and downloads one node's trust material. Every listed file is
    /// attempted; per-file failures are returned, session failures are errors.
    fn backup_node(&self, node: &Node, is_etcd: bool) -> Result<NodeBackup, RotationError> {
        let old = self.archive.phase_dir(&node.name, Phase::Old);
        let sudo = self.config.ssh.sudo;
        let mut roots = vec![&self.config.remote_paths.kubernetes_dir];
        if is_etcd {
            roots.push(&self.config.remote_paths.etcd_ssl_dir);
        }

        with_runner(self.connector.as_ref(), node, |runner| {
            let mut wanted: BTreeSet<PathBuf> =
                required_files(is_etcd).into_iter().map(PathBuf::from).collect();
            if self.dry_run {
                wanted.extend(STANDARD_KUBECONFIGS.iter().map(PathBuf::from));
            }
            for root in &roots {
                let listing =
                    runner.run(&privileged(&format!("find {} -type f", shell_quote(root)), sudo))?;
                wanted.extend(
                    listing
                        .lines()
                        .filter_map(|line| self.archive.local_relative(line.trim())),
                );
            }

            let mut backup = NodeBackup::default();
            for relative in &wanted {
                let Some(remote) = self.archive.remote_path(relative) else {
                    continue;
                };
                match runner.download(&remote, &old.join(relative)) {
                    Ok(()) => backup.fetched += 1,
                    Err(e) => {
                        warn!(node = %node.name, file = %remote, error = %e, "download failed");
                        backup.failed.push(relative.display().to_string());
                    }
                }
            }
            Ok::<_, RemoteError>(backup)
        })
        .map_err(|source| RotationError::Backup {
            node: node.name.clone(),
            source,
        })
    }

    /// SANs of the first master's live API server certificate. A dry run has
    /// only placeholders to read, so it falls back to the conventional set.
    fn api_server_sans(&self, topology: &ClusterTopology) -> Result<Vec<San>, RotationError> {
        let defaults = || {
            default_api_server_sans(
                topology
                    .master_nodes
                    .iter()
                    .map(|n| (n.name.as_str(), n.internal_ip.as_str())),
            )
        };
        let Some(first) = topology.first_master() else {
            return Ok(defaults());
        };
        let path = self
            .archive
            .phase_dir(&first.name, Phase::Old)
            .join(APISERVER_CERT);

        match extract_sans(&path) {
            Ok(sans) if !sans.is_empty() => {
                info!(node = %first.name, count = sans.len(), "preserving API server SANs");
                Ok(sans)
            }
            Ok(_) => {
                warn!(path = %path.display(), "API server certificate has no SANs, using defaults");
                Ok(defaults())
            }
            Err(e) if self.dry_run => {
                info!(error = %e, "[dry-run] using default API server SANs");
                Ok(defaults())
            }
            Err(source) => Err(RotationError::SanExtraction { path, source }),
        }
    }

    fn write_new_cas(&self, cas: &NewAuthorities) -> Result<(), RotationError> {
        let dir = self.archive.new_cas_dir();
        for (sub, name, pair) in [
            ("kubernetes", "ca.crt", &cas.kubernetes),
            ("etcd", "ca.pem", &cas.etcd),
            ("front-proxy", "ca.crt", &cas.front_proxy),
        ] {
            let target = dir.join(sub);
            write_pair(&target, name, pair).map_err(workspace_err(&target))?;
        }
        Ok(())
    }

    fn build_new_tree(
        &self,
        node: &Node,
        is_etcd: bool,
        material: &Material,
    ) -> Result<(), RotationError> {
        let days = self.config.certificates.cert_expiry_days;
        let cas = &material.authorities;
        let old = self.archive.phase_dir(&node.name, Phase::Old);
        let new = self.archive.phase_dir(&node.name, Phase::New);
        let pki = new.join(KUBERNETES_DIR).join("pki");

        write_pair(&pki, "ca.crt", &cas.kubernetes).map_err(workspace_err(&pki))?;
        write_pair(&pki, "front-proxy-ca.crt", &cas.front_proxy).map_err(workspace_err(&pki))?;
        generate_and_write(
            &api_server_spec(&material.api_server_sans, days),
            &cas.kubernetes,
            &pki,
            "apiserver.crt",
        )?;
        generate_and_write(
            &kubelet_client_spec(days),
            &cas.kubernetes,
            &pki,
            "apiserver-kubelet-client.crt",
        )?;
        generate_and_write(
            &front_proxy_client_spec(days),
            &cas.front_proxy,
            &pki,
            "front-proxy-client.crt",
        )?;

        let sa_key = pki.join("sa.key");
        write_private_file(&sa_key, &material.service_account.private_pem)
            .map_err(workspace_err(&sa_key))?;
        let sa_pub = pki.join("sa.pub");
        write_file(&sa_pub, &material.service_account.public_pem)
            .map_err(workspace_err(&sa_pub))?;

        if is_etcd {
            let ssl = new.join(ETCD_SSL_DIR);
            write_pair(&ssl, "ca.pem", &cas.etcd).map_err(workspace_err(&ssl))?;
            for role in EtcdRole::ALL {
                generate_and_write(
                    &role.spec(&node.name, &material.etcd_sans, days),
                    &cas.etcd,
                    &ssl,
                    &role.file_name(&node.name),
                )?;
            }
        }

        let mut reissued = 0;
        for relative in kubeconfigs_under(&old)? {
            if kubeconfig::reissue(&old.join(&relative), &new.join(&relative), &cas.kubernetes, days)? {
                reissued += 1;
            }
        }
        debug!(node = %node.name, kubeconfigs = reissued, "built new/ tree");
        Ok(())
    }

    fn build_bundle_tree(
        &self,
        node: &Node,
        is_etcd: bool,
        cas: &NewAuthorities,
    ) -> Result<(), RotationError> {
        let old = self.archive.phase_dir(&node.name, Phase::Old);
        let bundle = self.archive.phase_dir(&node.name, Phase::Bundle);

        let mut trust = vec![
            (K8S_CA_CERT, &cas.kubernetes.cert_pem),
            (FRONT_PROXY_CA_CERT, &cas.front_proxy.cert_pem),
        ];
        if is_etcd {
            trust.push((ETCD_CA_CERT, &cas.etcd.cert_pem));
        }
        let mut k8s_bundle = Vec::new();
        for (relative, new_ca) in trust {
            let source = old.join(relative);
            let old_ca = fs::read(&source).map_err(workspace_err(&source))?;
            let combined = concat_bundle(&old_ca, new_ca);
            let target = bundle.join(relative);
            write_file(&target, &combined).map_err(workspace_err(&target))?;
            if relative == K8S_CA_CERT {
                k8s_bundle = combined;
            }
        }

        for relative in kubeconfigs_under(&old)? {
            kubeconfig::rewrite_ca(&old.join(&relative), &bundle.join(&relative), &k8s_bundle)?;
        }
        debug!(node = %node.name, "built bundle/ tree");
        Ok(())
    }

    fn write_top_level_bundles(
        &self,
        topology: &ClusterTopology,
        cas: &NewAuthorities,
    ) -> Result<(), RotationError> {
        let sources = [
            (topology.first_master(), K8S_CA_CERT, &cas.kubernetes, K8S_BUNDLE),
            (topology.first_master(), FRONT_PROXY_CA_CERT, &cas.front_proxy, FRONT_PROXY_BUNDLE),
            (topology.etcd_nodes.first(), ETCD_CA_CERT, &cas.etcd, ETCD_BUNDLE),
        ];
        for (node, relative, new_ca, name) in sources {
            let Some(node) = node else { continue };
            let source = self.archive.phase_dir(&node.name, Phase::Old).join(relative);
            let old_ca = fs::read(&source).map_err(workspace_err(&source))?;
            let target = self.archive.root().join(name);
            write_file(&target, &concat_bundle(&old_ca, &new_ca.cert_pem))
                .map_err(workspace_err(&target))?;
        }
        Ok(())
    }
}

fn kubeconfigs_under(dir: &Path) -> Result<Vec<PathBuf>, RotationError> {
    Ok(Archive::files_under(dir)
        .map_err(workspace_err(dir))?
        .into_iter()
        .filter(|p| is_kubeconfig(p))
        .collect())
}
