// src/cert/front_proxy.rs
use super::types::{CertSpec, ExtendedKeyUsage, Subject};

pub fn front_proxy_client_spec(expiry_days: u32) -> CertSpec {
    CertSpec::leaf(Subject::common_name("front-proxy-client"), expiry_days)
        .with_usage(&[ExtendedKeyUsage::ClientAuth])
}
