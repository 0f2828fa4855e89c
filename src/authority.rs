//! Certificate Authority Manager
//!
//! Bootstraps or loads the private root authority that anchors every leaf
//! certificate. Bootstrap is idempotent: existing material is loaded and
//! returned unchanged unless regeneration is forced.
//!
//! # Regeneration Warning
//! Re-creating the root authority invalidates the trust chain of every
//! previously issued leaf. That is never done silently: a forced
//! regeneration over existing material logs a prominent warning, and the
//! CLI repeats it on stderr.

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::engine::{CryptoEngine, SubjectName};
use crate::errors::{PkiError, Result};
use crate::store::CertStore;

/// The trust root: private key plus self-signed certificate.
#[derive(Debug)]
pub struct CertificateAuthority {
    pub key: PKey<Private>,
    pub certificate: X509,
}

/// Load the authority from disk, or bootstrap it if absent.
///
/// With `force` set, existing material is regenerated in place; the
/// chain-breaking warning above applies. Without it, existing material is
/// returned unchanged with no side effects.
pub fn ensure_ca(
    engine: &dyn CryptoEngine,
    store: &CertStore,
    config: &AppConfig,
    force: bool,
) -> Result<CertificateAuthority> {
    let exists = store.ca_exists();
    if exists && !force {
        return load_ca(store);
    }
    if exists {
        warn!(
            "regenerating root CA at {}: every previously issued leaf certificate \
             no longer chains to the new root",
            store.ca_cert_path().display()
        );
    }

    let profile = &config.ca;
    let subject = SubjectName {
        common_name: profile.common_name.clone(),
        organization: profile.organization.clone(),
        organizational_unit: profile.organizational_unit.clone(),
        locality: profile.locality.clone(),
        state: profile.state.clone(),
        country: profile.country.clone(),
    };

    info!(bits = profile.key_bits, "generating root CA keypair");
    let key = engine.generate_keypair(profile.key_bits)?;
    let certificate = engine.self_sign(&key, &subject, profile.validity_days)?;

    let key_pem = key
        .private_key_to_pem_pkcs8()
        .map_err(|e| PkiError::engine("serialize-ca-key", e))?;
    let cert_pem = certificate
        .to_pem()
        .map_err(|e| PkiError::engine("serialize-ca-certificate", e))?;
    store.write_private_key(&store.ca_key_path(), &key_pem)?;
    store.write_certificate(&store.ca_cert_path(), &cert_pem)?;
    info!(path = %store.ca_cert_path().display(), "root CA ready");

    Ok(CertificateAuthority { key, certificate })
}

/// Load existing authority material, failing with `MissingMaterial` when
/// the store has none. Used by paths that must never bootstrap (validate,
/// rotate).
pub fn load_ca(store: &CertStore) -> Result<CertificateAuthority> {
    for path in [store.ca_key_path(), store.ca_cert_path()] {
        if !path.is_file() {
            return Err(PkiError::MissingMaterial {
                service: "ca".to_string(),
                path,
            });
        }
    }
    let key = store.load_private_key(&store.ca_key_path())?;
    let certificate = store.load_certificate(&store.ca_cert_path())?;
    Ok(CertificateAuthority { key, certificate })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OpensslEngine;
    use std::fs;
    use tempfile::TempDir;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.ca.key_bits = 2048;
        config
    }

    #[test]
    fn test_bootstrap_then_idempotent_load() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let engine = OpensslEngine::new();
        let config = test_config();

        let ca = ensure_ca(&engine, &store, &config, false).unwrap();
        assert!(store.ca_exists());
        assert!(engine.verify_chain(&ca.certificate, &ca.certificate).unwrap());

        let cert_before = fs::read(store.ca_cert_path()).unwrap();
        let key_before = fs::read(store.ca_key_path()).unwrap();

        // Second call must be a pure load, byte-identical on disk
        let reloaded = ensure_ca(&engine, &store, &config, false).unwrap();
        assert_eq!(fs::read(store.ca_cert_path()).unwrap(), cert_before);
        assert_eq!(fs::read(store.ca_key_path()).unwrap(), key_before);
        assert!(engine
            .key_matches_certificate(&reloaded.key, &reloaded.certificate)
            .unwrap());
    }

    #[test]
    fn test_forced_regeneration_replaces_material() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let engine = OpensslEngine::new();
        let config = test_config();

        ensure_ca(&engine, &store, &config, false).unwrap();
        let cert_before = fs::read(store.ca_cert_path()).unwrap();

        ensure_ca(&engine, &store, &config, true).unwrap();
        assert_ne!(fs::read(store.ca_cert_path()).unwrap(), cert_before);
    }

    #[test]
    fn test_load_without_material_fails() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let err = load_ca(&store).unwrap_err();
        assert_eq!(err.code(), "missing-material");
    }

    #[test]
    fn test_subject_uses_configured_profile() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let engine = OpensslEngine::new();
        let config = test_config();

        let ca = ensure_ca(&engine, &store, &config, false).unwrap();
        let cn = ca
            .certificate
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .expect("subject has a CN");
        assert_eq!(cn.data().as_utf8().unwrap().to_string(), "Root CA");
    }
}
