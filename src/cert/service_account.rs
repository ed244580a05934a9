// src/cert/service_account.rs
use openssl::rsa::Rsa;

use super::types::CertError;

/// Token-signing key pair for the API server (`sa.key` / `sa.pub`).
#[derive(Clone)]
pub struct ServiceAccountKeyPair {
    pub public_pem: Vec<u8>,
    pub private_pem: Vec<u8>,
}

pub fn generate_service_account_key_pair() -> Result<ServiceAccountKeyPair, CertError> {
    let rsa = Rsa::generate(2048)?;
    Ok(ServiceAccountKeyPair {
        public_pem: rsa.public_key_to_pem()?,
        private_pem: rsa.private_key_to_pem()?,
    })
}
