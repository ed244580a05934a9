// src/cert/verification.rs
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    path::Path,
};

use openssl::{nid::Nid, x509::X509};
use x509_parser::{extensions::GeneralName, pem::parse_x509_pem};

use super::types::{CertError, San, Subject};

/// Reads every DNS and IP subject alternative name from a PEM certificate
/// on disk, in the order they appear.
pub fn extract_sans(path: &Path) -> Result<Vec<San>, CertError> {
    let bytes = fs::read(path)?;
    extract_sans_from_pem(&bytes)
        .map_err(|e| CertError::Parse(format!("{}: {}", path.display(), e)))
}

fn extract_sans_from_pem(bytes: &[u8]) -> Result<Vec<San>, String> {
    let (_, pem) = parse_x509_pem(bytes).map_err(|e| format!("not a PEM document: {}", e))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| format!("not an X.509 certificate: {}", e))?;

    let mut sans = Vec::new();
    let extension = cert
        .subject_alternative_name()
        .map_err(|e| format!("bad subjectAltName: {}", e))?;
    if let Some(ext) = extension {
        for name in &ext.value.general_names {
            match name {
                GeneralName::DNSName(dns) => sans.push(San::Dns(dns.to_string())),
                GeneralName::IPAddress(raw) => {
                    if let Some(ip) = ip_from_octets(raw) {
                        sans.push(San::Ip(ip));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(sans)
}

fn ip_from_octets(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => <[u8; 4]>::try_from(raw).ok().map(|o| IpAddr::V4(Ipv4Addr::from(o))),
        16 => <[u8; 16]>::try_from(raw).ok().map(|o| IpAddr::V6(Ipv6Addr::from(o))),
        _ => None,
    }
}

/// CN and O of the first certificate in `cert_pem`.
pub fn certificate_subject(cert_pem: &[u8]) -> Result<Subject, CertError> {
    let cert =
        X509::from_pem(cert_pem).map_err(|e| CertError::Parse(format!("certificate: {}", e)))?;
    let name = cert.subject_name();

    let mut subject = Subject::default();
    if let Some(cn) = name.entries_by_nid(Nid::COMMONNAME).next() {
        subject.common_name = cn.data().as_utf8()?.to_string();
    }
    for o in name.entries_by_nid(Nid::ORGANIZATIONNAME) {
        subject.organization.push(o.data().as_utf8()?.to_string());
    }
    if subject.common_name.is_empty() {
        return Err(CertError::Parse("certificate has no common name".to_string()));
    }
    Ok(subject)
}

/// True when `cert_pem` carries a signature made by the key behind `ca_pem`.
#[cfg(test)]
pub fn is_signed_by(cert_pem: &[u8], ca_pem: &[u8]) -> Result<bool, CertError> {
    let cert =
        X509::from_pem(cert_pem).map_err(|e| CertError::Parse(format!("certificate: {}", e)))?;
    let ca = X509::from_pem(ca_pem).map_err(|e| CertError::Parse(format!("CA: {}", e)))?;
    let ca_key = ca.public_key()?;
    Ok(cert.verify(&ca_key)?)
}
