// cert/types.rs
use serde::{Deserialize, Serialize};
use std::{fmt, io, net::IpAddr};

#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("invalid subject {subject:?}: {reason}")]
    InvalidSubject { subject: String, reason: String },

    #[error("a leaf certificate needs an issuing CA")]
    MissingIssuer,

    #[error("a CA certificate is self-signed and must not be given an issuer")]
    UnexpectedIssuer,

    #[error("expiry must be at least one day, got {0}")]
    InvalidExpiry(u32),

    #[error("failed to parse certificate material: {0}")]
    Parse(String),

    #[error("openssl error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Distinguished-name fields a rotated certificate may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub common_name: String,
    pub organization: Vec<String>,
    pub organizational_unit: Vec<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
}

impl Subject {
    pub fn common_name(cn: impl Into<String>) -> Self {
        Self {
            common_name: cn.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.country {
            write!(f, "/C={}", c)?;
        }
        for st in &self.state {
            write!(f, "/ST={}", st)?;
        }
        for l in &self.locality {
            write!(f, "/L={}", l)?;
        }
        for o in &self.organization {
            write!(f, "/O={}", o)?;
        }
        for ou in &self.organizational_unit {
            write!(f, "/OU={}", ou)?;
        }
        write!(f, "/CN={}", self.common_name)
    }
}

/// Parses the slash-delimited `/CN=x/O=y` form used by openssl `-subj`.
pub fn parse_subject(subject: &str) -> Result<Subject, CertError> {
    let invalid = |reason: String| CertError::InvalidSubject {
        subject: subject.to_string(),
        reason,
    };

    let mut parsed = Subject::default();
    for part in subject.trim().trim_start_matches('/').split('/') {
        if part.trim().is_empty() {
            continue;
        }
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| invalid(format!("segment {:?} is not key=value", part)))?;
        let (key, value) = (key.trim(), value.trim());
        if value.is_empty() {
            return Err(invalid(format!("empty value for {}", key)));
        }
        match key {
            "CN" => parsed.common_name = value.to_string(),
            "O" => parsed.organization.push(value.to_string()),
            "OU" => parsed.organizational_unit.push(value.to_string()),
            "C" => parsed.country = Some(value.to_string()),
            "ST" => parsed.state = Some(value.to_string()),
            "L" => parsed.locality = Some(value.to_string()),
            other => return Err(invalid(format!("unsupported attribute {:?}", other))),
        }
    }

    if parsed.common_name.is_empty() {
        return Err(invalid("a Common Name (CN) is required".to_string()));
    }
    Ok(parsed)
}

/// Subject alternative name. Anything that parses as an IP literal is an
/// address, everything else is a DNS name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum San {
    Dns(String),
    Ip(IpAddr),
}

impl San {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.parse::<IpAddr>() {
            Ok(ip) => San::Ip(ip),
            Err(_) => San::Dns(value.to_string()),
        }
    }

    pub fn parse_all<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<San> {
        values.into_iter().map(San::parse).collect()
    }
}

impl fmt::Display for San {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            San::Dns(name) => write!(f, "{}", name),
            San::Ip(ip) => write!(f, "{}", ip),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtendedKeyUsage {
    ServerAuth,
    ClientAuth,
}

/// Fully determines one certificate. Keys are always RSA-2048.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertSpec {
    pub subject: Subject,
    pub sans: Vec<San>,
    pub expiry_days: u32,
    pub extended_key_usage: Vec<ExtendedKeyUsage>,
    pub is_ca: bool,
}

impl CertSpec {
    pub fn ca(subject: Subject, expiry_days: u32) -> Self {
        Self {
            subject,
            sans: Vec::new(),
            expiry_days,
            extended_key_usage: Vec::new(),
            is_ca: true,
        }
    }

    pub fn leaf(subject: Subject, expiry_days: u32) -> Self {
        Self {
            subject,
            sans: Vec::new(),
            expiry_days,
            extended_key_usage: Vec::new(),
            is_ca: false,
        }
    }

    pub fn with_sans(mut self, sans: &[San]) -> Self {
        self.sans = sans.to_vec();
        self
    }

    pub fn with_usage(mut self, usage: &[ExtendedKeyUsage]) -> Self {
        self.extended_key_usage = usage.to_vec();
        self
    }
}

/// PEM-encoded certificate and its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificatePair {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl fmt::Debug for CertificatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificatePair")
            .field("cert_pem", &String::from_utf8_lossy(&self.cert_pem))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}
