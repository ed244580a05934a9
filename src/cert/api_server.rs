// src/cert/api_server.rs
use super::types::{CertSpec, ExtendedKeyUsage, San, Subject};

/// Serving certificate for kube-apiserver. `sans` are carried over from the
/// certificate being replaced so existing clients keep matching.
pub fn api_server_spec(sans: &[San], expiry_days: u32) -> CertSpec {
    CertSpec::leaf(Subject::common_name("kube-apiserver"), expiry_days)
        .with_sans(sans)
        .with_usage(&[ExtendedKeyUsage::ServerAuth])
}

/// SANs to fall back to when the live apiserver certificate cannot be read.
pub fn default_api_server_sans<'a>(masters: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<San> {
    let mut sans = vec![
        San::parse("localhost"),
        San::parse("127.0.0.1"),
        San::parse("kubernetes"),
        San::parse("kubernetes.default"),
        San::parse("kubernetes.default.svc"),
        San::parse("kubernetes.default.svc.cluster.local"),
    ];
    for (name, ip) in masters {
        for value in [name, ip] {
            let san = San::parse(value);
            if !sans.contains(&san) {
                sans.push(san);
            }
        }
    }
    sans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_sans_cover_master_names_and_addresses() {
        let sans = default_api_server_sans([("m1", "10.0.0.1"), ("m2", "10.0.0.2")]);
        assert!(sans.contains(&San::parse("m1")));
        assert!(sans.contains(&San::parse("10.0.0.2")));
        assert_eq!(sans.iter().filter(|s| **s == San::parse("127.0.0.1")).count(), 1);
    }

    #[test]
    fn api_server_is_server_auth_only() {
        let spec = api_server_spec(&[San::parse("m1")], 365);
        assert!(!spec.is_ca);
        assert_eq!(spec.extended_key_usage, vec![ExtendedKeyUsage::ServerAuth]);
        assert_eq!(spec.subject.common_name, "kube-apiserver");
    }
}
