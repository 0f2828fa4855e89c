//! Expiration Classifier
//!
//! Pure mapping from remaining validity to an operational severity. The
//! threshold ordering precondition is enforced when a [`Thresholds`] is
//! constructed, never at classification time.

use serde::Serialize;

use crate::errors::{PkiError, Result};

/// Operational severity buckets, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Valid,
    Warning,
    Critical,
    Expired,
}

/// Validated `warning_days`/`critical_days` pair.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    warning_days: i64,
    critical_days: i64,
}

impl Thresholds {
    /// Fails with a configuration error unless `critical_days < warning_days`.
    pub fn new(warning_days: i64, critical_days: i64) -> Result<Self> {
        if critical_days >= warning_days {
            return Err(PkiError::Config(format!(
                "critical_days ({}) must be strictly below warning_days ({})",
                critical_days, warning_days
            )));
        }
        Ok(Self {
            warning_days,
            critical_days,
        })
    }

    pub fn warning_days(&self) -> i64 {
        self.warning_days
    }

    pub fn critical_days(&self) -> i64 {
        self.critical_days
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_days: 30,
            critical_days: 7,
        }
    }
}

/// Derived expiration state of one certificate.
#[derive(Debug, Clone, Copy)]
pub struct ExpirationStatus {
    pub days_remaining: i64,
    pub classification: Classification,
}

/// Bucket `days_remaining` into a severity.
///
/// The integer line is partitioned into four contiguous ranges:
/// `expired` below zero, `critical` up to `critical_days`, `warning` up to
/// `warning_days`, `valid` above.
pub fn classify(days_remaining: i64, thresholds: &Thresholds) -> Classification {
    if days_remaining < 0 {
        Classification::Expired
    } else if days_remaining < thresholds.critical_days {
        Classification::Critical
    } else if days_remaining < thresholds.warning_days {
        Classification::Warning
    } else {
        Classification::Valid
    }
}

/// Convenience constructor pairing the day count with its bucket.
pub fn status_for(days_remaining: i64, thresholds: &Thresholds) -> ExpirationStatus {
    ExpirationStatus {
        days_remaining,
        classification: classify(days_remaining, thresholds),
    }
}
