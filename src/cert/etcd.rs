// src/cert/etcd.rs
use std::fmt;

use super::types::{CertSpec, ExtendedKeyUsage, San, Subject};

/// Per-host etcd certificates. All three serve and authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtcdRole {
    Admin,
    Node,
    Member,
}

impl EtcdRole {
    pub const ALL: [EtcdRole; 3] = [EtcdRole::Admin, EtcdRole::Node, EtcdRole::Member];

    fn prefix(self) -> &'static str {
        match self {
            EtcdRole::Admin => "admin",
            EtcdRole::Node => "node",
            EtcdRole::Member => "member",
        }
    }

    /// Certificate file name, e.g. `member-m1.pem`.
    pub fn file_name(self, hostname: &str) -> String {
        format!("{}-{}.pem", self.prefix(), hostname)
    }

    pub fn spec(self, hostname: &str, sans: &[San], expiry_days: u32) -> CertSpec {
        CertSpec::leaf(
            Subject::common_name(format!("etcd-{}-{}", self.prefix(), hostname)),
            expiry_days,
        )
        .with_sans(sans)
        .with_usage(&[ExtendedKeyUsage::ServerAuth, ExtendedKeyUsage::ClientAuth])
    }
}

impl fmt::Display for EtcdRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "etcd-{}", self.prefix())
    }
}

/// Loopback plus the name and address of every etcd member.
pub fn etcd_sans<'a>(members: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<San> {
    let mut sans = vec![San::parse("localhost"), San::parse("127.0.0.1")];
    for (name, ip) in members {
        for value in [name, ip] {
            let san = San::parse(value);
            if !sans.contains(&san) {
                sans.push(san);
            }
        }
    }
    sans
}
