// src/cert/operations.rs
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

use super::{
    openssl::generate_certificate,
    types::{CertError, CertSpec, CertificatePair},
};

/// Key file that sits next to a certificate: `x.crt` pairs with `x.key`,
/// `x.pem` with `x-key.pem`.
pub fn key_file_name(cert_name: &str) -> String {
    if let Some(stem) = cert_name.strip_suffix(".crt") {
        format!("{}.key", stem)
    } else if let Some(stem) = cert_name.strip_suffix(".pem") {
        format!("{}-key.pem", stem)
    } else {
        format!("{}.key", cert_name)
    }
}

pub fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

pub fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    write_file(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Writes `pair` as `dir/cert_name` plus its key file, returning both paths.
pub fn write_pair(
    dir: &Path,
    cert_name: &str,
    pair: &CertificatePair,
) -> io::Result<(PathBuf, PathBuf)> {
    let cert_path = dir.join(cert_name);
    let key_path = dir.join(key_file_name(cert_name));
    write_file(&cert_path, &pair.cert_pem)?;
    write_private_file(&key_path, &pair.key_pem)?;
    debug!(cert = %cert_path.display(), "wrote certificate pair");
    Ok((cert_path, key_path))
}

pub fn generate_and_write(
    spec: &CertSpec,
    issuer: &CertificatePair,
    dir: &Path,
    cert_name: &str,
) -> Result<CertificatePair, CertError> {
    let pair = generate_certificate(spec, Some(issuer))?;
    write_pair(dir, cert_name, &pair)?;
    Ok(pair)
}
