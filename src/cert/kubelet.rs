// src/cert/kubelet.rs
use super::types::{CertSpec, ExtendedKeyUsage, Subject};

pub fn kubelet_client_spec(expiry_days: u32) -> CertSpec {
    let subject = Subject {
        organization: vec!["system:masters".to_string()],
        ..Subject::common_name("kube-apiserver-kubelet-client")
    };
    CertSpec::leaf(subject, expiry_days).with_usage(&[ExtendedKeyUsage::ClientAuth])
}

/// Re-issues a kubeconfig client credential under the same identity.
pub fn client_spec(subject: Subject, expiry_days: u32) -> CertSpec {
    CertSpec::leaf(subject, expiry_days).with_usage(&[ExtendedKeyUsage::ClientAuth])
}
