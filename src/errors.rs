//! Error Taxonomy
//!
//! Every failure mode of the certificate lifecycle carries a short
//! machine-readable code (for monitoring consumers) alongside the
//! human-readable message rendered by `Display`.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PkiError>;

#[derive(Debug, Error)]
pub enum PkiError {
    /// The crypto engine failed mid-operation (key generation, signing,
    /// parsing, verification). Scoped to the named operation.
    #[error("crypto engine failure during {operation}: {detail}")]
    Engine {
        operation: &'static str,
        detail: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("missing certificate material for '{service}': {} not found", .path.display())]
    MissingMaterial { service: String, path: PathBuf },

    #[error("certificate for '{0}' does not verify against the CA")]
    ChainValidation(String),

    #[error("private key does not match certificate for '{0}'")]
    KeyMismatch(String),

    /// Re-issuance failed mid-rotation. `rolled_back` records whether the
    /// automatic restore of the pre-rotation material succeeded.
    #[error("rotation of '{service}' failed (rolled back: {rolled_back}): {detail}")]
    Rotation {
        service: String,
        detail: String,
        rolled_back: bool,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PkiError {
    /// Wrap an OpenSSL error stack into an engine failure scoped to `operation`.
    pub fn engine(operation: &'static str, err: openssl::error::ErrorStack) -> Self {
        PkiError::Engine {
            operation,
            detail: err.to_string(),
        }
    }

    /// Short machine-readable code for this failure mode.
    pub fn code(&self) -> &'static str {
        match self {
            PkiError::Engine { .. } => "engine-failure",
            PkiError::Config(_) => "config-invalid",
            PkiError::UnknownService(_) => "unknown-service",
            PkiError::MissingMaterial { .. } => "missing-material",
            PkiError::ChainValidation(_) => "chain-invalid",
            PkiError::KeyMismatch(_) => "key-mismatch",
            PkiError::Rotation { .. } => "rotation-failed",
            PkiError::Io(_) => "io-error",
        }
    }
}
