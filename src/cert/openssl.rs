// src/cert/openssl.rs
use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage as EkuExtension, KeyUsage,
            SubjectAlternativeName, SubjectKeyIdentifier,
        },
        X509Name, X509NameBuilder, X509Ref, X509,
    },
};
use tracing::debug;

use super::types::{CertError, CertSpec, CertificatePair, ExtendedKeyUsage, San, Subject};

const KEY_BITS: u32 = 2048;
const SERIAL_BITS: i32 = 127;

/// Issues one certificate. CAs are self-signed; every other certificate
/// is signed by `issuer`.
pub fn generate_certificate(
    spec: &CertSpec,
    issuer: Option<&CertificatePair>,
) -> Result<CertificatePair, CertError> {
    if spec.expiry_days == 0 {
        return Err(CertError::InvalidExpiry(spec.expiry_days));
    }
    let parent = match (spec.is_ca, issuer) {
        (true, Some(_)) => return Err(CertError::UnexpectedIssuer),
        (false, None) => return Err(CertError::MissingIssuer),
        (true, None) => None,
        (false, Some(pair)) => Some(load_issuer(pair)?),
    };

    debug!(subject = %spec.subject, ca = spec.is_ca, "issuing certificate");

    let rsa = Rsa::generate(KEY_BITS)?;
    let key_pem = rsa.private_key_to_pem()?;
    let key = PKey::from_rsa(rsa)?;

    let name = build_name(&spec.subject)?;
    let mut builder = X509::builder()?;
    builder.set_version(2)?;

    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    builder.set_subject_name(&name)?;
    match &parent {
        Some((cert, _)) => builder.set_issuer_name(cert.subject_name())?,
        None => builder.set_issuer_name(&name)?,
    }
    builder.set_pubkey(&key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(spec.expiry_days)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    let parent_ref: Option<&X509Ref> = parent.as_ref().map(|(cert, _)| &**cert);

    if spec.is_ca {
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_cert_sign()
                .crl_sign()
                .build()?,
        )?;
    } else {
        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
    }

    if !spec.extended_key_usage.is_empty() {
        let mut eku = EkuExtension::new();
        for usage in &spec.extended_key_usage {
            match usage {
                ExtendedKeyUsage::ServerAuth => eku.server_auth(),
                ExtendedKeyUsage::ClientAuth => eku.client_auth(),
            };
        }
        builder.append_extension(eku.build()?)?;
    }

    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(parent_ref, None))?;
    builder.append_extension(ski)?;

    if parent_ref.is_some() {
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(parent_ref, None))?;
        builder.append_extension(aki)?;
    }

    if !spec.sans.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for entry in &spec.sans {
            match entry {
                San::Dns(dns) => san.dns(dns),
                San::Ip(ip) => san.ip(&ip.to_string()),
            };
        }
        let ext = san.build(&builder.x509v3_context(parent_ref, None))?;
        builder.append_extension(ext)?;
    }

    match &parent {
        Some((_, parent_key)) => builder.sign(parent_key, MessageDigest::sha256())?,
        None => builder.sign(&key, MessageDigest::sha256())?,
    }

    Ok(CertificatePair {
        cert_pem: builder.build().to_pem()?,
        key_pem,
    })
}

fn load_issuer(pair: &CertificatePair) -> Result<(X509, PKey<Private>), CertError> {
    let cert = X509::from_pem(&pair.cert_pem)
        .map_err(|e| CertError::Parse(format!("issuer certificate: {}", e)))?;
    let key = PKey::private_key_from_pem(&pair.key_pem)
        .map_err(|e| CertError::Parse(format!("issuer key: {}", e)))?;
    if !cert.public_key()?.public_eq(&key) {
        return Err(CertError::Parse(
            "issuer key does not match issuer certificate".to_string(),
        ));
    }
    Ok((cert, key))
}

fn build_name(subject: &Subject) -> Result<X509Name, CertError> {
    let mut name = X509NameBuilder::new()?;
    if let Some(c) = &subject.country {
        name.append_entry_by_nid(Nid::COUNTRYNAME, c)?;
    }
    if let Some(st) = &subject.state {
        name.append_entry_by_nid(Nid::STATEORPROVINCENAME, st)?;
    }
    if let Some(l) = &subject.locality {
        name.append_entry_by_nid(Nid::LOCALITYNAME, l)?;
    }
    for o in &subject.organization {
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, o)?;
    }
    for ou in &subject.organizational_unit {
        name.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, ou)?;
    }
    name.append_entry_by_nid(Nid::COMMONNAME, &subject.common_name)?;
    Ok(name.build())
}

/// SHA-256 over the DER encoding of the first certificate in `cert_pem`.
pub fn fingerprint_sha256(cert_pem: &[u8]) -> Result<String, CertError> {
    let cert =
        X509::from_pem(cert_pem).map_err(|e| CertError::Parse(format!("certificate: {}", e)))?;
    let der = cert.to_der()?;
    Ok(hex::encode(openssl::hash::hash(MessageDigest::sha256(), &der)?))
}
