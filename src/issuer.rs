//! Certificate Issuer
//!
//! Builds and signs one service's leaf certificate against the authority.
//! Issuance is idempotent by default: existing material is loaded and
//! returned unchanged, which protects batch runs from accidental reissue.
//! Forced issuance replaces the on-disk key/cert pair atomically.
//!
//! # Certificate Properties
//! - **Common Name**: `stack-<service>`
//! - **Validity**: 825 days
//! - **Basic Constraints**: CA=false, critical
//! - **Key Usage**: digitalSignature, keyEncipherment (critical)
//! - **Extended Key Usage**: serverAuth, clientAuth
//! - **Subject Alternative Name**: the SAN registry's list for the service

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tracing::info;

use crate::authority::CertificateAuthority;
use crate::config::AppConfig;
use crate::engine::CryptoEngine;
use crate::errors::{PkiError, Result};
use crate::san_policy;
use crate::store::CertStore;

/// Leaf validity: roughly two and a quarter years.
pub const LEAF_VALIDITY_DAYS: u32 = 825;

/// Common-name prefix shared by every issued leaf.
pub const COMMON_NAME_PREFIX: &str = "stack";

/// One service's issued material.
#[derive(Debug)]
pub struct LeafCertificate {
    pub service: String,
    pub key: PKey<Private>,
    pub certificate: X509,
}

/// Issue (or load) the leaf certificate for `service`.
///
/// With existing material and `force == false` this is a no-op load. A
/// forced issue generates a fresh keypair, signs a CSR with
/// CN `stack-<service>` against the CA, and atomically replaces the
/// service's `server.key`/`server.crt` plus its CA copy.
pub fn issue(
    engine: &dyn CryptoEngine,
    store: &CertStore,
    config: &AppConfig,
    ca: &CertificateAuthority,
    service: &str,
    force: bool,
) -> Result<LeafCertificate> {
    let sans = san_policy::sans_for(service)?;

    if store.service_material_exists(service) && !force {
        return load(store, service);
    }

    let key = engine.generate_keypair(config.leaf_key_bits)?;
    let common_name = format!("{}-{}", COMMON_NAME_PREFIX, service);
    let csr = engine.create_csr(&key, &common_name)?;
    let certificate = engine.sign_csr(&csr, &ca.key, &ca.certificate, &sans, LEAF_VALIDITY_DAYS)?;

    let key_pem = key
        .private_key_to_pem_pkcs8()
        .map_err(|e| PkiError::engine("serialize-leaf-key", e))?;
    let cert_pem = certificate
        .to_pem()
        .map_err(|e| PkiError::engine("serialize-leaf-certificate", e))?;
    let ca_pem = ca
        .certificate
        .to_pem()
        .map_err(|e| PkiError::engine("serialize-ca-certificate", e))?;

    store.write_private_key(&store.service_key_path(service), &key_pem)?;
    store.write_certificate(&store.service_cert_path(service), &cert_pem)?;
    store.write_certificate(&store.service_ca_path(service), &ca_pem)?;
    let fingerprint = engine.fingerprint(&certificate)?;
    info!(service, %fingerprint, "issued leaf certificate");

    Ok(LeafCertificate {
        service: service.to_string(),
        key,
        certificate,
    })
}

/// Load previously issued material without touching it.
pub fn load(store: &CertStore, service: &str) -> Result<LeafCertificate> {
    for path in [store.service_key_path(service), store.service_cert_path(service)] {
        if !path.is_file() {
            return Err(PkiError::MissingMaterial {
                service: service.to_string(),
                path,
            });
        }
    }
    let key = store.load_private_key(&store.service_key_path(service))?;
    let certificate = store.load_certificate(&store.service_cert_path(service))?;
    Ok(LeafCertificate {
        service: service.to_string(),
        key,
        certificate,
    })
}

/// Human-readable description of a service's issued certificate: subject,
/// issuer, SANs, expiry, and fingerprint.
pub fn describe(engine: &dyn CryptoEngine, store: &CertStore, service: &str) -> Result<String> {
    if !san_policy::is_known(service) {
        return Err(PkiError::UnknownService(service.to_string()));
    }
    let leaf = load(store, service)?;
    let cert = &leaf.certificate;

    let mut out = String::new();
    out.push_str(&format!("Certificate: {}\n", store.service_cert_path(service).display()));
    out.push_str(&format!("  Subject:     {}\n", name_to_string(cert.subject_name())));
    out.push_str(&format!("  Issuer:      {}\n", name_to_string(cert.issuer_name())));
    out.push_str(&format!("  Not after:   {}\n", cert.not_after()));
    out.push_str(&format!(
        "  Days left:   {}\n",
        engine.days_until_expiry(cert)?
    ));
    out.push_str(&format!("  Fingerprint: sha256:{}\n", engine.fingerprint(cert)?));
    out.push_str("  SANs:\n");
    if let Some(names) = cert.subject_alt_names() {
        for name in names.iter() {
            if let Some(dns) = name.dnsname() {
                out.push_str(&format!("    DNS:{}\n", dns));
            } else if let Some(ip) = name.ipaddress() {
                out.push_str(&format!("    IP:{}\n", format_ip(ip)));
            }
        }
    }
    Ok(out)
}

fn name_to_string(name: &openssl::x509::X509NameRef) -> String {
    name.entries()
        .filter_map(|entry| {
            let value = entry.data().as_utf8().ok()?;
            Some(format!("{}={}", entry.object().nid().short_name().ok()?, value))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_ip(raw: &[u8]) -> String {
    match raw.len() {
        4 => std::net::Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]).to_string(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(raw);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => format!("{:?}", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::ensure_ca;
    use crate::engine::OpensslEngine;
    use std::fs;
    use tempfile::TempDir;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.ca.key_bits = 2048;
        config.leaf_key_bits = 2048;
        config
    }

    fn fixture() -> (TempDir, CertStore, OpensslEngine, AppConfig, CertificateAuthority) {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let engine = OpensslEngine::new();
        let config = test_config();
        let ca = ensure_ca(&engine, &store, &config, false).unwrap();
        (dir, store, engine, config, ca)
    }

    #[test]
    fn test_issue_writes_layout_and_chains() {
        let (_dir, store, engine, config, ca) = fixture();
        let leaf = issue(&engine, &store, &config, &ca, "postgres", false).unwrap();

        assert!(store.service_key_path("postgres").is_file());
        assert!(store.service_cert_path("postgres").is_file());
        assert!(store.service_ca_path("postgres").is_file());
        assert!(engine.verify_chain(&leaf.certificate, &ca.certificate).unwrap());
        assert!(engine.key_matches_certificate(&leaf.key, &leaf.certificate).unwrap());

        let days = engine.days_until_expiry(&leaf.certificate).unwrap();
        assert!((824..=825).contains(&days), "got {} days", days);
    }

    #[test]
    fn test_reissue_without_force_is_noop() {
        let (_dir, store, engine, config, ca) = fixture();
        issue(&engine, &store, &config, &ca, "redis", false).unwrap();
        let key_before = fs::read(store.service_key_path("redis")).unwrap();
        let cert_before = fs::read(store.service_cert_path("redis")).unwrap();

        issue(&engine, &store, &config, &ca, "redis", false).unwrap();
        assert_eq!(fs::read(store.service_key_path("redis")).unwrap(), key_before);
        assert_eq!(fs::read(store.service_cert_path("redis")).unwrap(), cert_before);
    }

    #[test]
    fn test_forced_reissue_replaces_material() {
        let (_dir, store, engine, config, ca) = fixture();
        issue(&engine, &store, &config, &ca, "redis", false).unwrap();
        let cert_before = fs::read(store.service_cert_path("redis")).unwrap();

        issue(&engine, &store, &config, &ca, "redis", true).unwrap();
        assert_ne!(fs::read(store.service_cert_path("redis")).unwrap(), cert_before);
    }

    #[test]
    fn test_unknown_service_isolated() {
        let (_dir, store, engine, config, ca) = fixture();
        let err = issue(&engine, &store, &config, &ca, "mongodb", false).unwrap_err();
        assert_eq!(err.code(), "unknown-service");
        // A failed service must not poison the rest of a batch
        assert!(issue(&engine, &store, &config, &ca, "postgres", false).is_ok());
    }

    #[test]
    fn test_describe_reports_sans_and_cn() {
        let (_dir, store, engine, config, ca) = fixture();
        issue(&engine, &store, &config, &ca, "rabbitmq", false).unwrap();
        let info = describe(&engine, &store, "rabbitmq").unwrap();
        assert!(info.contains("CN=stack-rabbitmq"));
        assert!(info.contains("DNS:rabbitmq"));
        assert!(info.contains("DNS:rabbitmq.stack.internal"));
        assert!(info.contains("IP:127.0.0.1"));
        assert!(info.contains("sha256:"));
    }
}
