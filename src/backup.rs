//! Backup Store
//!
//! Timestamped snapshots of a service's live key/cert pair, kept solely to
//! support rollback after a failed rotation. Retention is bounded per
//! service; the oldest pair is pruned first.

use std::fs;
use std::path::PathBuf;

use chrono::Local;
use tracing::{debug, info};

use crate::errors::{PkiError, Result};
use crate::store::CertStore;

const BACKUP_PREFIX: &str = "server_";

/// One retained snapshot: matching key and cert files sharing a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub service: String,
    pub timestamp: String,
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

pub struct BackupStore<'a> {
    store: &'a CertStore,
    retention: usize,
}

impl<'a> BackupStore<'a> {
    pub fn new(store: &'a CertStore, retention: usize) -> Self {
        Self { store, retention }
    }

    /// Snapshot the live pair for `service`, then prune beyond retention.
    pub fn snapshot(&self, service: &str) -> Result<BackupEntry> {
        let live_key = self.store.service_key_path(service);
        let live_cert = self.store.service_cert_path(service);
        for path in [&live_key, &live_cert] {
            if !path.is_file() {
                return Err(PkiError::MissingMaterial {
                    service: service.to_string(),
                    path: path.clone(),
                });
            }
        }

        let dir = self.store.backup_dir(service);
        let timestamp = self.unique_timestamp(service)?;
        let key_path = dir.join(format!("{}{}.key", BACKUP_PREFIX, timestamp));
        let cert_path = dir.join(format!("{}{}.crt", BACKUP_PREFIX, timestamp));

        self.store.write_private_key(&key_path, &fs::read(&live_key)?)?;
        self.store.write_certificate(&cert_path, &fs::read(&live_cert)?)?;
        info!(service, %timestamp, "backed up live certificate material");

        self.prune(service)?;
        Ok(BackupEntry {
            service: service.to_string(),
            timestamp,
            key_path,
            cert_path,
        })
    }

    // Second-granularity timestamps collide under rapid rotation. Names
    // must stay lexicographically newer than every retained entry, so the
    // counter extends the newest existing name rather than probing for a
    // free one (pruning frees old names that would sort first).
    fn unique_timestamp(&self, service: &str) -> Result<String> {
        let base = Local::now().format("%Y%m%d%H%M%S").to_string();
        match self.entries(service)?.last() {
            Some(last) if last.timestamp.as_str() >= base.as_str() => {
                let (stem, counter) = match last.timestamp.split_once('_') {
                    Some((stem, counter)) => {
                        (stem.to_string(), counter.parse::<u32>().unwrap_or(0))
                    }
                    None => (last.timestamp.clone(), 0),
                };
                Ok(format!("{}_{:04}", stem, counter + 1))
            }
            _ => Ok(base),
        }
    }

    /// Retained entries for `service`, oldest first.
    pub fn entries(&self, service: &str) -> Result<Vec<BackupEntry>> {
        let dir = self.store.backup_dir(service);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut timestamps = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name
                .strip_prefix(BACKUP_PREFIX)
                .and_then(|rest| rest.strip_suffix(".key"))
            {
                let cert = dir.join(format!("{}{}.crt", BACKUP_PREFIX, stem));
                if cert.is_file() {
                    timestamps.push(stem.to_string());
                }
            }
        }
        timestamps.sort();
        Ok(timestamps
            .into_iter()
            .map(|timestamp| BackupEntry {
                service: service.to_string(),
                key_path: dir.join(format!("{}{}.key", BACKUP_PREFIX, timestamp)),
                cert_path: dir.join(format!("{}{}.crt", BACKUP_PREFIX, timestamp)),
                timestamp,
            })
            .collect())
    }

    pub fn latest(&self, service: &str) -> Result<Option<BackupEntry>> {
        Ok(self.entries(service)?.pop())
    }

    fn prune(&self, service: &str) -> Result<()> {
        let entries = self.entries(service)?;
        if entries.len() <= self.retention {
            return Ok(());
        }
        let excess = entries.len() - self.retention;
        for entry in &entries[..excess] {
            debug!(service, timestamp = %entry.timestamp, "pruning backup");
            fs::remove_file(&entry.key_path)?;
            fs::remove_file(&entry.cert_path)?;
        }
        Ok(())
    }

    /// Restore a snapshot over the live pair, atomically per file.
    pub fn restore(&self, entry: &BackupEntry) -> Result<()> {
        let key = fs::read(&entry.key_path)?;
        let cert = fs::read(&entry.cert_path)?;
        self.store
            .write_private_key(&self.store.service_key_path(&entry.service), &key)?;
        self.store
            .write_certificate(&self.store.service_cert_path(&entry.service), &cert)?;
        info!(
            service = %entry.service,
            timestamp = %entry.timestamp,
            "restored certificate material from backup"
        );
        Ok(())
    }
}
