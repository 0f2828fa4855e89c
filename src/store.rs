//! Certificate Store
//!
//! Explicit handle over the on-disk layout:
//!
//! ```text
//! <root>/ca/ca.key                               owner-only
//! <root>/ca/ca.crt                               world-readable
//! <root>/<service>/{server.key, server.crt, ca.crt}
//! <root>/backups/<service>/server_<ts>.{key, crt}
//! ```
//!
//! Private keys are written 0600 at creation and never widened; certificates
//! are 0644. All writes go through a temp file in the destination directory
//! followed by a rename, so a concurrent reader never observes a
//! half-written file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::{PkiError, Result};

const LOCK_FILE: &str = ".certops.lock";
const KEY_MODE: u32 = 0o600;
const CERT_MODE: u32 = 0o644;

pub struct CertStore {
    root: PathBuf,
}

impl CertStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ca_key_path(&self) -> PathBuf {
        self.root.join("ca").join("ca.key")
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.root.join("ca").join("ca.crt")
    }

    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.root.join(service)
    }

    pub fn service_key_path(&self, service: &str) -> PathBuf {
        self.service_dir(service).join("server.key")
    }

    pub fn service_cert_path(&self, service: &str) -> PathBuf {
        self.service_dir(service).join("server.crt")
    }

    /// Per-service copy of the CA certificate, for consumers that mount only
    /// their own directory.
    pub fn service_ca_path(&self, service: &str) -> PathBuf {
        self.service_dir(service).join("ca.crt")
    }

    pub fn backup_dir(&self, service: &str) -> PathBuf {
        self.root.join("backups").join(service)
    }

    pub fn ca_exists(&self) -> bool {
        self.ca_key_path().is_file() && self.ca_cert_path().is_file()
    }

    pub fn service_material_exists(&self, service: &str) -> bool {
        self.service_key_path(service).is_file() && self.service_cert_path(service).is_file()
    }

    pub fn write_private_key(&self, path: &Path, pem: &[u8]) -> Result<()> {
        self.write_atomic(path, pem, KEY_MODE)
    }

    pub fn write_certificate(&self, path: &Path, pem: &[u8]) -> Result<()> {
        self.write_atomic(path, pem, CERT_MODE)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            PkiError::Config(format!("path {} has no parent directory", path.display()))
        })?;
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))?;
        tmp.persist(path).map_err(|e| PkiError::Io(e.error))?;
        debug!(path = %path.display(), "wrote {} bytes", bytes.len());
        Ok(())
    }

    pub fn load_private_key(&self, path: &Path) -> Result<PKey<Private>> {
        let pem = fs::read(path)?;
        PKey::private_key_from_pem(&pem).map_err(|e| PkiError::engine("load-private-key", e))
    }

    pub fn load_certificate(&self, path: &Path) -> Result<X509> {
        let pem = fs::read(path)?;
        X509::from_pem(&pem).map_err(|e| PkiError::engine("load-certificate", e))
    }

    /// Take the advisory single-writer lock for this store.
    ///
    /// Concurrent generate/rotate runs against the same store are unsafe, so
    /// mutating commands hold this for their whole run. Read-only validation
    /// does not take it.
    pub fn acquire_lock(&self) -> Result<StoreLock> {
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(StoreLock { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(PkiError::Config(format!(
                "certificate store {} is locked by another run; remove {} if that run is dead",
                self.root.display(),
                path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Held for the duration of a mutating run; releases the lock file on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
