//! Rotation Orchestrator
//!
//! Decides which services need rotation and performs backup-protected
//! re-issuance. Each service walks a small state machine:
//!
//! ```text
//! evaluate ──────────────► Skipped
//!     │ should_rotate
//!     ▼
//! Rotating ── issue ok ──► Rotated (restart hook + notification)
//!     │ issue failed
//!     ▼
//! restore backup ────────► RolledBack, else Failed
//! ```
//!
//! One service's failure never aborts the batch; the run's exit status
//! reflects the worst per-service outcome.

use tracing::{error, info, warn};

use crate::authority::CertificateAuthority;
use crate::backup::BackupStore;
use crate::config::AppConfig;
use crate::engine::CryptoEngine;
use crate::errors::PkiError;
use crate::expiry::Thresholds;
use crate::hooks::{Notifier, RestartHook};
use crate::issuer;
use crate::store::CertStore;
use crate::validator::{self, CertStatus};

/// Why a service will or will not rotate.
#[derive(Debug, Clone)]
pub struct RotationDecision {
    pub service: String,
    pub should_rotate: bool,
    pub reason: String,
}

/// Terminal state of one service's rotation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    Skipped { reason: String },
    Rotated { restarted: bool },
    Failed { error: String },
    RolledBack { error: String },
}

impl RotationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RotationOutcome::Failed { .. } | RotationOutcome::RolledBack { .. }
        )
    }
}

#[derive(Debug)]
pub struct RotationReport {
    pub service: String,
    pub outcome: RotationOutcome,
}

#[derive(Debug, Clone, Copy)]
pub struct RotationOptions {
    pub force: bool,
    pub dry_run: bool,
    pub skip_restart: bool,
    pub backup: bool,
}

/// Everything a rotation run needs, threaded explicitly instead of read
/// from ambient state.
pub struct RotationContext<'a> {
    pub engine: &'a dyn CryptoEngine,
    pub store: &'a CertStore,
    pub config: &'a AppConfig,
    pub ca: &'a CertificateAuthority,
    pub thresholds: &'a Thresholds,
    pub restart: &'a RestartHook,
    pub notifier: &'a Notifier,
}

/// Rotation policy: forced runs always rotate; otherwise any certificate in
/// the warning band or worse does. Defective material (missing, invalid,
/// mismatched) also rotates, since forced re-issuance is its repair path.
pub fn decide(result: &validator::ValidationResult, force: bool) -> RotationDecision {
    let (should_rotate, reason) = if force {
        (true, "rotation forced".to_string())
    } else {
        match result.status {
            CertStatus::Valid => (false, result.message.clone()),
            CertStatus::Warning | CertStatus::Critical | CertStatus::Expired => {
                (true, result.message.clone())
            }
            CertStatus::Missing | CertStatus::Invalid | CertStatus::Mismatch => (
                true,
                format!("material defective ({}): {}", result.status.label(), result.message),
            ),
        }
    };
    RotationDecision {
        service: result.service.clone(),
        should_rotate,
        reason,
    }
}

/// Rotate one service through the state machine above.
pub fn rotate_service(
    ctx: &RotationContext<'_>,
    service: &str,
    opts: &RotationOptions,
) -> RotationReport {
    let current = validator::validate_service(ctx.engine, ctx.store, ctx.thresholds, service);
    let decision = decide(&current, opts.force);

    if !decision.should_rotate {
        info!(service, reason = %decision.reason, "rotation skipped");
        return RotationReport {
            service: service.to_string(),
            outcome: RotationOutcome::Skipped {
                reason: decision.reason,
            },
        };
    }

    let backups = BackupStore::new(ctx.store, ctx.config.backup_retention);
    let can_backup = opts.backup && ctx.store.service_material_exists(service);

    if opts.dry_run {
        let reason = if can_backup {
            format!("dry run: would rotate ({}), backing up current material", decision.reason)
        } else {
            format!("dry run: would rotate ({})", decision.reason)
        };
        info!(service, "{}", reason);
        return RotationReport {
            service: service.to_string(),
            outcome: RotationOutcome::Skipped { reason },
        };
    }

    info!(service, reason = %decision.reason, "rotating");

    // Snapshot before mutating. A failed snapshot aborts this service's
    // rotation: re-issuance without a restore path is not attempted.
    let snapshot = if can_backup {
        match backups.snapshot(service) {
            Ok(entry) => Some(entry),
            Err(e) => {
                error!(service, error = %e, "backup failed, rotation aborted");
                return RotationReport {
                    service: service.to_string(),
                    outcome: RotationOutcome::Failed {
                        error: format!("backup failed: {}", e),
                    },
                };
            }
        }
    } else {
        None
    };

    match issuer::issue(ctx.engine, ctx.store, ctx.config, ctx.ca, service, true) {
        Ok(leaf) => {
            let mut restarted = false;
            if !opts.skip_restart {
                match ctx.restart.restart(service) {
                    Ok(ran) => restarted = ran,
                    Err(e) => warn!(service, error = %e, "restart hook failed"),
                }
            }
            let fingerprint = ctx
                .engine
                .fingerprint(&leaf.certificate)
                .unwrap_or_else(|_| "unavailable".to_string());
            ctx.notifier.notify(
                service,
                "rotated",
                &format!("certificate rotated, fingerprint sha256:{}", fingerprint),
            );
            RotationReport {
                service: service.to_string(),
                outcome: RotationOutcome::Rotated { restarted },
            }
        }
        Err(issue_err) => {
            let outcome = match &snapshot {
                Some(entry) => match backups.restore(entry) {
                    Ok(()) => RotationOutcome::RolledBack {
                        error: issue_err.to_string(),
                    },
                    Err(restore_err) => RotationOutcome::Failed {
                        error: PkiError::Rotation {
                            service: service.to_string(),
                            detail: format!(
                                "{}; rollback also failed: {}",
                                issue_err, restore_err
                            ),
                            rolled_back: false,
                        }
                        .to_string(),
                    },
                },
                None => RotationOutcome::Failed {
                    error: issue_err.to_string(),
                },
            };
            error!(service, error = %issue_err, rolled_back = matches!(outcome, RotationOutcome::RolledBack { .. }), "rotation failed");
            ctx.notifier.notify(
                service,
                "rotation-failed",
                &format!("rotation failed: {}", issue_err),
            );
            RotationReport {
                service: service.to_string(),
                outcome,
            }
        }
    }
}

/// Rotate every named service, attempting all regardless of individual
/// failures.
pub fn rotate_all(
    ctx: &RotationContext<'_>,
    services: &[&str],
    opts: &RotationOptions,
) -> Vec<RotationReport> {
    services
        .iter()
        .map(|service| rotate_service(ctx, service, opts))
        .collect()
}

/// Worst per-service outcome: non-zero when any rotation ended `Failed` or
/// `RolledBack` (re-issuance failed even though material was restored).
pub fn exit_code(reports: &[RotationReport]) -> u8 {
    if reports.iter().any(|r| r.outcome.is_failure()) {
        1
    } else {
        0
    }
}
