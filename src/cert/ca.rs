// src/cert/ca.rs
use tracing::info;

use super::{
    openssl::generate_certificate,
    types::{parse_subject, CertError, CertSpec, CertificatePair},
};
use crate::config::CertificateSettings;

/// The three authorities a rotation replaces.
#[derive(Debug, Clone)]
pub struct NewAuthorities {
    pub kubernetes: CertificatePair,
    pub etcd: CertificatePair,
    pub front_proxy: CertificatePair,
}

pub fn generate_ca(subject: &str, expiry_days: u32) -> Result<CertificatePair, CertError> {
    let spec = CertSpec::ca(parse_subject(subject)?, expiry_days);
    generate_certificate(&spec, None)
}

pub fn generate_authorities(settings: &CertificateSettings) -> Result<NewAuthorities, CertError> {
    info!("Generating new Kubernetes, etcd and front-proxy CAs");
    Ok(NewAuthorities {
        kubernetes: generate_ca(&settings.kubernetes_ca_subject, settings.ca_expiry_days)?,
        etcd: generate_ca(&settings.etcd_ca_subject, settings.ca_expiry_days)?,
        front_proxy: generate_ca(&settings.front_proxy_ca_subject, settings.ca_expiry_days)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::certificate_subject;

    #[test]
    fn authorities_use_configured_subjects() {
        let settings = CertificateSettings {
            ca_expiry_days: 10,
            ..CertificateSettings::default()
        };
        let cas = generate_authorities(&settings).unwrap();

        let cn = |pair: &CertificatePair| certificate_subject(&pair.cert_pem).unwrap().common_name;
        assert_eq!(cn(&cas.kubernetes), "kubernetes");
        assert_eq!(cn(&cas.etcd), "etcd-ca");
        assert_eq!(cn(&cas.front_proxy), "front-proxy-ca");
    }

    #[test]
    fn bad_subject_is_rejected_before_key_generation() {
        assert!(matches!(
            generate_ca("/O=nobody", 10),
            Err(CertError::InvalidSubject { .. })
        ));
    }
}
