// src/cert/mod.rs
mod api_server;
mod ca;
mod etcd;
mod front_proxy;
mod kubelet;
mod openssl;
pub mod operations;
mod service_account;
mod types;
mod verification;

pub use api_server::{api_server_spec, default_api_server_sans};
pub use ca::{generate_authorities, generate_ca, NewAuthorities};
pub use etcd::{etcd_sans, EtcdRole};
pub use front_proxy::front_proxy_client_spec;
pub use kubelet::{client_spec, kubelet_client_spec};
pub use openssl::{fingerprint_sha256, generate_certificate};
pub use service_account::{generate_service_account_key_pair, ServiceAccountKeyPair};
pub use types::{
    parse_subject, CertError, CertSpec, CertificatePair, ExtendedKeyUsage, San, Subject,
};
pub use verification::{certificate_subject, extract_sans};
#[cfg(test)]
pub use verification::is_signed_by;
