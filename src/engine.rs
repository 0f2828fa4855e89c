//! Crypto Engine
//!
//! Typed primitives over the cryptographic backend: key generation,
//! self-signing, CSR creation and signing, chain verification, and
//! certificate introspection. Callers never touch the backend directly, so
//! the [`OpensslEngine`] can be swapped for another implementation without
//! changes anywhere else in the crate.
//!
//! # Certificate Properties
//! - **Version**: X.509v3
//! - **Signature Algorithm**: SHA-256 with RSA
//! - **Serial Number**: Random 128-bit number per certificate; no shared
//!   serial-tracking state exists between issuances
//!
//! Any backend failure surfaces as [`PkiError::Engine`], scoped to the
//! operation that was in flight.

use std::cmp::Ordering;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509, X509Name, X509Req};

use crate::errors::{PkiError, Result};
use crate::san_policy::SanEntry;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2

/// Distinguished name for a self-signed authority certificate.
#[derive(Debug, Clone)]
pub struct SubjectName {
    pub common_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub locality: String,
    pub state: String,
    pub country: String,
}

/// The operations every crypto backend must provide.
///
/// The default backend is [`OpensslEngine`]; tests substitute failing
/// implementations to exercise rollback paths.
pub trait CryptoEngine {
    /// Generate a fresh RSA key pair of the given size.
    fn generate_keypair(&self, bits: u32) -> Result<PKey<Private>>;

    /// Create a self-signed X.509v3 CA certificate for `key`.
    ///
    /// The certificate carries `basicConstraints = critical, CA:TRUE` and
    /// `keyUsage = critical, keyCertSign, cRLSign, digitalSignature`.
    fn self_sign(&self, key: &PKey<Private>, subject: &SubjectName, validity_days: u32)
        -> Result<X509>;

    /// Build a certificate signing request with the given common name.
    fn create_csr(&self, key: &PKey<Private>, common_name: &str) -> Result<X509Req>;

    /// Sign a CSR with the CA, producing an end-entity TLS certificate.
    ///
    /// The leaf carries `basicConstraints = critical, CA:FALSE`,
    /// `keyUsage = critical, digitalSignature, keyEncipherment`,
    /// `extendedKeyUsage = serverAuth, clientAuth`, and the supplied SANs.
    fn sign_csr(
        &self,
        csr: &X509Req,
        ca_key: &PKey<Private>,
        ca_cert: &X509,
        sans: &[SanEntry],
        validity_days: u32,
    ) -> Result<X509>;

    /// Check that `cert` was issued and signed by `ca_cert`.
    fn verify_chain(&self, cert: &X509, ca_cert: &X509) -> Result<bool>;

    /// Whole days until the certificate's `notAfter`, floor semantics:
    /// negative once expired, `-1` within the first day past expiry.
    fn days_until_expiry(&self, cert: &X509) -> Result<i64>;

    /// Lowercase hex SHA-256 fingerprint of the DER certificate.
    fn fingerprint(&self, cert: &X509) -> Result<String>;

    /// Check that the private key's public part matches the certificate's.
    /// A mismatch indicates corrupted material, distinct from chain failure.
    fn key_matches_certificate(&self, key: &PKey<Private>, cert: &X509) -> Result<bool>;
}

/// Native backend built on the `openssl` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpensslEngine;

impl OpensslEngine {
    pub fn new() -> Self {
        OpensslEngine
    }
}

fn random_serial() -> std::result::Result<openssl::asn1::Asn1Integer, openssl::error::ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    serial.to_asn1_integer()
}

fn build_subject(subject: &SubjectName) -> std::result::Result<X509Name, openssl::error::ErrorStack>
{
    let mut name_builder = X509Name::builder()?;
    name_builder.append_entry_by_nid(Nid::COMMONNAME, &subject.common_name)?;
    name_builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, &subject.organization)?;
    name_builder.append_entry_by_nid(
        Nid::ORGANIZATIONALUNITNAME,
        &subject.organizational_unit,
    )?;
    name_builder.append_entry_by_nid(Nid::LOCALITYNAME, &subject.locality)?;
    name_builder.append_entry_by_nid(Nid::STATEORPROVINCENAME, &subject.state)?;
    name_builder.append_entry_by_nid(Nid::COUNTRYNAME, &subject.country)?;
    Ok(name_builder.build())
}

impl CryptoEngine for OpensslEngine {
    fn generate_keypair(&self, bits: u32) -> Result<PKey<Private>> {
        let rsa = openssl::rsa::Rsa::generate(bits)
            .map_err(|e| PkiError::engine("generate-keypair", e))?;
        PKey::from_rsa(rsa).map_err(|e| PkiError::engine("generate-keypair", e))
    }

    fn self_sign(
        &self,
        key: &PKey<Private>,
        subject: &SubjectName,
        validity_days: u32,
    ) -> Result<X509> {
        let wrap = |e| PkiError::engine("self-sign", e);

        let mut builder = X509::builder().map_err(wrap)?;
        builder.set_version(X509_VERSION_3).map_err(wrap)?;
        builder
            .set_serial_number(random_serial().map_err(wrap)?.as_ref())
            .map_err(wrap)?;

        let name = build_subject(subject).map_err(wrap)?;
        builder.set_subject_name(&name).map_err(wrap)?;
        // Self-signed: issuer and subject are the same
        builder.set_issuer_name(&name).map_err(wrap)?;

        let not_before = Asn1Time::days_from_now(0).map_err(wrap)?;
        builder.set_not_before(&not_before).map_err(wrap)?;
        let not_after = Asn1Time::days_from_now(validity_days).map_err(wrap)?;
        builder.set_not_after(&not_after).map_err(wrap)?;

        builder.set_pubkey(key).map_err(wrap)?;

        let bc = BasicConstraints::new().critical().ca().build().map_err(wrap)?;
        builder.append_extension(bc).map_err(wrap)?;

        let ku = KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature()
            .build()
            .map_err(wrap)?;
        builder.append_extension(ku).map_err(wrap)?;

        builder.sign(key, MessageDigest::sha256()).map_err(wrap)?;
        Ok(builder.build())
    }

    fn create_csr(&self, key: &PKey<Private>, common_name: &str) -> Result<X509Req> {
        let wrap = |e| PkiError::engine("create-csr", e);

        let mut name_builder = X509Name::builder().map_err(wrap)?;
        name_builder
            .append_entry_by_nid(Nid::COMMONNAME, common_name)
            .map_err(wrap)?;
        let name = name_builder.build();

        let mut builder = X509Req::builder().map_err(wrap)?;
        builder.set_subject_name(&name).map_err(wrap)?;
        builder.set_pubkey(key).map_err(wrap)?;
        builder.sign(key, MessageDigest::sha256()).map_err(wrap)?;
        Ok(builder.build())
    }

    fn sign_csr(
        &self,
        csr: &X509Req,
        ca_key: &PKey<Private>,
        ca_cert: &X509,
        sans: &[SanEntry],
        validity_days: u32,
    ) -> Result<X509> {
        let wrap = |e| PkiError::engine("sign-csr", e);

        let requester_key = csr.public_key().map_err(wrap)?;
        if !csr.verify(&requester_key).map_err(wrap)? {
            return Err(PkiError::Engine {
                operation: "sign-csr",
                detail: "CSR signature does not verify".to_string(),
            });
        }

        let mut builder = X509::builder().map_err(wrap)?;
        builder.set_version(X509_VERSION_3).map_err(wrap)?;
        builder
            .set_serial_number(random_serial().map_err(wrap)?.as_ref())
            .map_err(wrap)?;

        builder.set_subject_name(csr.subject_name()).map_err(wrap)?;
        builder
            .set_issuer_name(ca_cert.subject_name())
            .map_err(wrap)?;

        let not_before = Asn1Time::days_from_now(0).map_err(wrap)?;
        builder.set_not_before(&not_before).map_err(wrap)?;
        let not_after = Asn1Time::days_from_now(validity_days).map_err(wrap)?;
        builder.set_not_after(&not_after).map_err(wrap)?;

        builder.set_pubkey(&requester_key).map_err(wrap)?;

        // End-entity certificate: CA=false
        let bc = BasicConstraints::new().critical().build().map_err(wrap)?;
        builder.append_extension(bc).map_err(wrap)?;

        let ku = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()
            .map_err(wrap)?;
        builder.append_extension(ku).map_err(wrap)?;

        // Services authenticate to each other in both directions
        let eku = ExtendedKeyUsage::new()
            .server_auth()
            .client_auth()
            .build()
            .map_err(wrap)?;
        builder.append_extension(eku).map_err(wrap)?;

        let mut san = SubjectAlternativeName::new();
        for entry in sans {
            match entry {
                SanEntry::Dns(name) => {
                    san.dns(name);
                }
                SanEntry::Ip(addr) => {
                    san.ip(addr);
                }
            }
        }
        let san = san
            .build(&builder.x509v3_context(Some(ca_cert), None))
            .map_err(wrap)?;
        builder.append_extension(san).map_err(wrap)?;

        builder.sign(ca_key, MessageDigest::sha256()).map_err(wrap)?;
        Ok(builder.build())
    }

    fn verify_chain(&self, cert: &X509, ca_cert: &X509) -> Result<bool> {
        let wrap = |e| PkiError::engine("verify-chain", e);

        let issuer_matches = cert
            .issuer_name()
            .try_cmp(ca_cert.subject_name())
            .map_err(wrap)?
            == Ordering::Equal;
        if !issuer_matches {
            return Ok(false);
        }
        let ca_public = ca_cert.public_key().map_err(wrap)?;
        cert.verify(&ca_public).map_err(wrap)
    }

    fn days_until_expiry(&self, cert: &X509) -> Result<i64> {
        let wrap = |e| PkiError::engine("days-until-expiry", e);

        let now = Asn1Time::days_from_now(0).map_err(wrap)?;
        let diff = now.diff(cert.not_after()).map_err(wrap)?;
        // ASN1_TIME_diff yields whole days plus a same-signed remainder of
        // seconds; fold the remainder down for floor semantics.
        let mut days = i64::from(diff.days);
        if diff.secs < 0 {
            days -= 1;
        }
        Ok(days)
    }

    fn fingerprint(&self, cert: &X509) -> Result<String> {
        let digest = cert
            .digest(MessageDigest::sha256())
            .map_err(|e| PkiError::engine("fingerprint", e))?;
        Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    fn key_matches_certificate(&self, key: &PKey<Private>, cert: &X509) -> Result<bool> {
        let wrap = |e| PkiError::engine("key-match", e);

        let cert_public = cert.public_key().map_err(wrap)?.public_key_to_der().map_err(wrap)?;
        let key_public = key.public_key_to_der().map_err(wrap)?;
        Ok(cert_public == key_public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_subject(cn: &str) -> SubjectName {
        SubjectName {
            common_name: cn.to_string(),
            organization: "Test Org".to_string(),
            organizational_unit: "Testing".to_string(),
            locality: "Testville".to_string(),
            state: "TS".to_string(),
            country: "US".to_string(),
        }
    }

    fn test_ca(engine: &OpensslEngine) -> (PKey<Private>, X509) {
        let key = engine.generate_keypair(2048).unwrap();
        let cert = engine.self_sign(&key, &test_subject("Test Root CA"), 3650).unwrap();
        (key, cert)
    }

    #[test]
    fn test_self_signed_ca_verifies_against_itself() {
        let engine = OpensslEngine::new();
        let (key, cert) = test_ca(&engine);
        assert!(engine.verify_chain(&cert, &cert).unwrap());
        assert!(engine.key_matches_certificate(&key, &cert).unwrap());
    }

    #[test]
    fn test_signed_leaf_verifies_against_ca_only() {
        let engine = OpensslEngine::new();
        let (ca_key, ca_cert) = test_ca(&engine);
        let (_, other_ca_cert) = test_ca(&engine);

        let leaf_key = engine.generate_keypair(2048).unwrap();
        let csr = engine.create_csr(&leaf_key, "stack-postgres").unwrap();
        let sans = vec![
            SanEntry::Dns("postgres".to_string()),
            SanEntry::Ip("127.0.0.1".to_string()),
        ];
        let leaf = engine.sign_csr(&csr, &ca_key, &ca_cert, &sans, 825).unwrap();

        assert!(engine.verify_chain(&leaf, &ca_cert).unwrap());
        // Same engine, same subject profile, different key: must not verify
        assert!(!engine.verify_chain(&leaf, &other_ca_cert).unwrap());
        assert!(engine.key_matches_certificate(&leaf_key, &leaf).unwrap());
    }

    #[test]
    fn test_key_mismatch_detected() {
        let engine = OpensslEngine::new();
        let (ca_key, ca_cert) = test_ca(&engine);

        let leaf_key = engine.generate_keypair(2048).unwrap();
        let csr = engine.create_csr(&leaf_key, "stack-redis").unwrap();
        let leaf = engine
            .sign_csr(&csr, &ca_key, &ca_cert, &[SanEntry::Dns("redis".to_string())], 825)
            .unwrap();

        let stranger = engine.generate_keypair(2048).unwrap();
        assert!(!engine.key_matches_certificate(&stranger, &leaf).unwrap());
    }

    #[test]
    fn test_days_until_expiry_near_validity() {
        let engine = OpensslEngine::new();
        let (_, cert) = test_ca(&engine);
        let days = engine.days_until_expiry(&cert).unwrap();
        assert!((3649..=3650).contains(&days), "got {} days", days);
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let engine = OpensslEngine::new();
        let (_, cert) = test_ca(&engine);
        let fp = engine.fingerprint(&cert).unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
