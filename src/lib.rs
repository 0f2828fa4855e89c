//! certops - Internal TLS Certificate Lifecycle Manager
//!
//! Manages the certificates a fixed fleet of infrastructure services
//! (database, connection pooler, cache, message broker, API gateway) uses
//! for internally-trusted TLS: a private root authority, per-service leaf
//! certificates with the right Subject Alternative Names, continuous
//! validation, and backup-protected rotation.
//!
//! # Architecture
//!
//! The crate is layered leaves-first:
//!
//! - [`engine`]: typed primitives over the crypto backend
//! - [`authority`]: root CA bootstrap/load, idempotent unless forced
//! - [`san_policy`]: fixed per-service SAN table
//! - [`issuer`]: leaf certificate issuance against the authority
//! - [`expiry`]: pure remaining-validity classifier
//! - [`validator`]: per-service health checks plus report renderers
//! - [`rotation`]: backup-protected re-issuance with rollback
//!
//! with [`store`] owning the on-disk layout and its permission policy,
//! [`backup`] the rollback snapshots, and [`hooks`] the external restart
//! and notification collaborators.
//!
//! # Example
//!
//! ```no_run
//! use certops::authority;
//! use certops::config::AppConfig;
//! use certops::engine::OpensslEngine;
//! use certops::issuer;
//! use certops::store::CertStore;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = AppConfig::load()?;
//! let store = CertStore::new(&config.cert_root);
//! let engine = OpensslEngine::new();
//!
//! let ca = authority::ensure_ca(&engine, &store, &config, false)?;
//! let leaf = issuer::issue(&engine, &store, &config, &ca, "postgres", false)?;
//! println!("issued {}", leaf.service);
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Everything is single-threaded and sequential. The store's advisory lock
//! file is the single-writer guard: concurrent generate/rotate runs against
//! one certificate store must be serialized, and mutating CLI commands hold
//! the lock for their whole run.

pub mod authority;
pub mod backup;
pub mod config;
pub mod engine;
pub mod errors;
pub mod expiry;
pub mod hooks;
pub mod issuer;
pub mod rotation;
pub mod san_policy;
pub mod store;
pub mod validator;

pub use errors::{PkiError, Result};
