//! Validator
//!
//! Aggregates the per-service health checks into a single result list and
//! renders it for humans, machines (JSON), and the monitoring system
//! (single-line summary).
//!
//! Checks run as an ordered sequence of distinct terminal states: missing
//! files, broken chain, key/cert mismatch, then expiry classification. The
//! first failing check decides the status: a service with no material is
//! `missing`, never `invalid`.

use serde::Serialize;
use tracing::debug;

use crate::engine::CryptoEngine;
use crate::expiry::{classify, Classification, Thresholds};
use crate::store::CertStore;

/// Terminal status of one service's material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    Valid,
    Warning,
    Critical,
    Expired,
    Missing,
    Invalid,
    Mismatch,
}

impl CertStatus {
    /// Statuses that fail a run outright, as opposed to warn-level ones.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            CertStatus::Missing | CertStatus::Invalid | CertStatus::Mismatch | CertStatus::Expired
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            CertStatus::Valid => "valid",
            CertStatus::Warning => "warning",
            CertStatus::Critical => "critical",
            CertStatus::Expired => "expired",
            CertStatus::Missing => "missing",
            CertStatus::Invalid => "invalid",
            CertStatus::Mismatch => "mismatch",
        }
    }
}

/// One service's validation outcome, JSON-shaped for machine consumers.
#[derive(Debug, Serialize)]
pub struct ValidationResult {
    pub service: String,
    pub status: CertStatus,
    pub days_until_expiry: Option<i64>,
    pub message: String,
    pub expiry_date: Option<String>,
}

/// Aggregate outcome of a validation run, in exit-code order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    Warn,
}

impl Outcome {
    /// Monitoring-system convention: 0 pass, 1 fail, 2 warn-only.
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Pass => 0,
            Outcome::Fail => 1,
            Outcome::Warn => 2,
        }
    }
}

/// Run the ordered checks for one service. Never returns an error: every
/// failure mode is a terminal status in the result.
pub fn validate_service(
    engine: &dyn CryptoEngine,
    store: &CertStore,
    thresholds: &Thresholds,
    service: &str,
) -> ValidationResult {
    debug!(service, "validating");

    // (a) all required files present
    let required = [
        store.service_key_path(service),
        store.service_cert_path(service),
        store.ca_cert_path(),
    ];
    let missing: Vec<String> = required
        .iter()
        .filter(|p| !p.is_file())
        .map(|p| p.display().to_string())
        .collect();
    if !missing.is_empty() {
        return ValidationResult {
            service: service.to_string(),
            status: CertStatus::Missing,
            days_until_expiry: None,
            message: format!("missing files: {}", missing.join(", ")),
            expiry_date: None,
        };
    }

    // (b) chain verifies against the CA
    let cert = match store.load_certificate(&store.service_cert_path(service)) {
        Ok(cert) => cert,
        Err(e) => return invalid(service, format!("certificate unreadable: {}", e)),
    };
    let ca_cert = match store.load_certificate(&store.ca_cert_path()) {
        Ok(cert) => cert,
        Err(e) => return invalid(service, format!("CA certificate unreadable: {}", e)),
    };
    let expiry_date = Some(cert.not_after().to_string());
    match engine.verify_chain(&cert, &ca_cert) {
        Ok(true) => {}
        Ok(false) => {
            return ValidationResult {
                service: service.to_string(),
                status: CertStatus::Invalid,
                days_until_expiry: None,
                message: "certificate does not verify against the CA".to_string(),
                expiry_date,
            }
        }
        Err(e) => return invalid(service, format!("chain verification failed: {}", e)),
    }

    // (c) key matches certificate
    let mismatch = |message: String| ValidationResult {
        service: service.to_string(),
        status: CertStatus::Mismatch,
        days_until_expiry: None,
        message,
        expiry_date: expiry_date.clone(),
    };
    let key = match store.load_private_key(&store.service_key_path(service)) {
        Ok(key) => key,
        Err(e) => return mismatch(format!("private key unreadable: {}", e)),
    };
    match engine.key_matches_certificate(&key, &cert) {
        Ok(true) => {}
        Ok(false) => return mismatch("private key does not match certificate".to_string()),
        Err(e) => return mismatch(format!("key comparison failed: {}", e)),
    }

    // (d) expiry classification
    let days = match engine.days_until_expiry(&cert) {
        Ok(days) => days,
        Err(e) => return invalid(service, format!("expiry unreadable: {}", e)),
    };
    let (status, message) = match classify(days, thresholds) {
        Classification::Valid => (
            CertStatus::Valid,
            format!("certificate valid ({} days remaining)", days),
        ),
        Classification::Warning => (
            CertStatus::Warning,
            format!(
                "certificate expires in {} days (warning below {})",
                days,
                thresholds.warning_days()
            ),
        ),
        Classification::Critical => (
            CertStatus::Critical,
            format!(
                "certificate expires in {} days (critical below {})",
                days,
                thresholds.critical_days()
            ),
        ),
        Classification::Expired => (
            CertStatus::Expired,
            format!("certificate expired {} days ago", -days),
        ),
    };
    ValidationResult {
        service: service.to_string(),
        status,
        days_until_expiry: Some(days),
        message,
        expiry_date,
    }
}

fn invalid(service: &str, message: String) -> ValidationResult {
    ValidationResult {
        service: service.to_string(),
        status: CertStatus::Invalid,
        days_until_expiry: None,
        message,
        expiry_date: None,
    }
}

/// Validate every named service, attempting all of them regardless of
/// individual failures.
pub fn validate_all(
    engine: &dyn CryptoEngine,
    store: &CertStore,
    thresholds: &Thresholds,
    services: &[&str],
) -> Vec<ValidationResult> {
    services
        .iter()
        .map(|service| validate_service(engine, store, thresholds, service))
        .collect()
}

pub fn outcome(results: &[ValidationResult]) -> Outcome {
    let mut worst = Outcome::Pass;
    for result in results {
        if result.status.is_failure() {
            return Outcome::Fail;
        }
        if matches!(result.status, CertStatus::Warning | CertStatus::Critical) {
            worst = Outcome::Warn;
        }
    }
    worst
}

/// Perfdata buckets: `ok` counts valid material, `warning` the warning
/// classification, `critical` everything worse.
fn bucket_counts(results: &[ValidationResult]) -> (usize, usize, usize) {
    let ok = results.iter().filter(|r| r.status == CertStatus::Valid).count();
    let warning = results
        .iter()
        .filter(|r| r.status == CertStatus::Warning)
        .count();
    let critical = results.len() - ok - warning;
    (ok, warning, critical)
}

/// Grouped human-readable report with per-bucket counts.
pub fn render_report(results: &[ValidationResult]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Certificate validation report ({} services)\n\n",
        results.len()
    ));
    for result in results {
        let marker = match result.status {
            CertStatus::Valid => '✓',
            CertStatus::Warning | CertStatus::Critical => '!',
            _ => '✗',
        };
        out.push_str(&format!(
            "  {} {:<10} {:<9} {}\n",
            marker,
            result.service,
            result.status.label(),
            result.message
        ));
    }
    let (ok, warning, critical) = bucket_counts(results);
    out.push_str(&format!(
        "\nSummary: ok={} warning={} critical={}\n",
        ok, warning, critical
    ));
    out
}

/// JSON array, one object per service.
pub fn render_json(results: &[ValidationResult]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(results)
}

/// Single-line monitoring summary with OK/WARNING/CRITICAL and per-bucket
/// counts.
pub fn render_nagios(results: &[ValidationResult]) -> String {
    let total = results.len();
    let (ok, warning, critical) = bucket_counts(results);
    let perfdata = format!("critical={} warning={} ok={}", critical, warning, ok);
    if critical > 0 {
        format!(
            "CRITICAL: {} of {} certificates require attention | {}",
            critical, total, perfdata
        )
    } else if warning > 0 {
        format!(
            "WARNING: {} of {} certificates expiring soon | {}",
            warning, total, perfdata
        )
    } else {
        format!("OK: All {} certificates valid | {}", total, perfdata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::ensure_ca;
    use crate::config::AppConfig;
    use crate::engine::OpensslEngine;
    use crate::issuer;
    use crate::store::CertStore;
    use tempfile::TempDir;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.ca.key_bits = 2048;
        config.leaf_key_bits = 2048;
        config
    }

    fn result(service: &str, status: CertStatus, days: Option<i64>) -> ValidationResult {
        ValidationResult {
            service: service.to_string(),
            status,
            days_until_expiry: days,
            message: String::new(),
            expiry_date: None,
        }
    }

    #[test]
    fn test_missing_material_is_terminal() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let engine = OpensslEngine::new();
        let result = validate_service(&engine, &store, &Thresholds::default(), "postgres");
        assert_eq!(result.status, CertStatus::Missing);
        assert!(result.days_until_expiry.is_none());
    }

    #[test]
    fn test_fresh_issue_validates_clean() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let engine = OpensslEngine::new();
        let config = test_config();
        let ca = ensure_ca(&engine, &store, &config, false).unwrap();
        issuer::issue(&engine, &store, &config, &ca, "postgres", false).unwrap();

        let result = validate_service(&engine, &store, &Thresholds::default(), "postgres");
        assert_eq!(result.status, CertStatus::Valid);
        let days = result.days_until_expiry.unwrap();
        assert!((824..=825).contains(&days), "got {} days", days);
        assert!(result.expiry_date.is_some());
    }

    #[test]
    fn test_foreign_ca_detected_as_invalid() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let engine = OpensslEngine::new();
        let config = test_config();
        let ca = ensure_ca(&engine, &store, &config, false).unwrap();
        issuer::issue(&engine, &store, &config, &ca, "redis", false).unwrap();

        // Replace the CA with fresh material: every leaf's chain breaks
        ensure_ca(&engine, &store, &config, true).unwrap();
        let result = validate_service(&engine, &store, &Thresholds::default(), "redis");
        assert_eq!(result.status, CertStatus::Invalid);
    }

    #[test]
    fn test_swapped_key_detected_as_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let engine = OpensslEngine::new();
        let config = test_config();
        let ca = ensure_ca(&engine, &store, &config, false).unwrap();
        issuer::issue(&engine, &store, &config, &ca, "redis", false).unwrap();

        let stranger = engine.generate_keypair(2048).unwrap();
        store
            .write_private_key(
                &store.service_key_path("redis"),
                &stranger.private_key_to_pem_pkcs8().unwrap(),
            )
            .unwrap();
        let result = validate_service(&engine, &store, &Thresholds::default(), "redis");
        assert_eq!(result.status, CertStatus::Mismatch);
    }

    #[test]
    fn test_batch_never_aborts_early() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let engine = OpensslEngine::new();
        let config = test_config();
        let ca = ensure_ca(&engine, &store, &config, false).unwrap();
        issuer::issue(&engine, &store, &config, &ca, "traefik", false).unwrap();

        let results = validate_all(
            &engine,
            &store,
            &Thresholds::default(),
            &["postgres", "traefik"],
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, CertStatus::Missing);
        assert_eq!(results[1].status, CertStatus::Valid);
        assert_eq!(outcome(&results), Outcome::Fail);
    }

    #[test]
    fn test_outcome_exit_codes() {
        let valid = result("a", CertStatus::Valid, Some(800));
        let warn = result("b", CertStatus::Warning, Some(20));
        let crit = result("c", CertStatus::Critical, Some(3));
        let expired = result("d", CertStatus::Expired, Some(-2));

        assert_eq!(outcome(&[valid]).exit_code(), 0);
        let valid = result("a", CertStatus::Valid, Some(800));
        assert_eq!(outcome(&[valid, warn]).exit_code(), 2);
        assert_eq!(outcome(&[crit]).exit_code(), 2);
        assert_eq!(outcome(&[expired]).exit_code(), 1);
    }

    #[test]
    fn test_nagios_ok_line_exact() {
        let results = vec![
            result("postgres", CertStatus::Valid, Some(820)),
            result("redis", CertStatus::Valid, Some(820)),
        ];
        assert_eq!(
            render_nagios(&results),
            "OK: All 2 certificates valid | critical=0 warning=0 ok=2"
        );
    }

    #[test]
    fn test_nagios_degraded_lines() {
        let results = vec![
            result("postgres", CertStatus::Valid, Some(820)),
            result("redis", CertStatus::Warning, Some(20)),
        ];
        assert_eq!(
            render_nagios(&results),
            "WARNING: 1 of 2 certificates expiring soon | critical=0 warning=1 ok=1"
        );

        let results = vec![
            result("postgres", CertStatus::Missing, None),
            result("redis", CertStatus::Warning, Some(20)),
        ];
        assert_eq!(
            render_nagios(&results),
            "CRITICAL: 1 of 2 certificates require attention | critical=1 warning=1 ok=0"
        );
    }

    #[test]
    fn test_json_shape() {
        let results = vec![result("postgres", CertStatus::Valid, Some(820))];
        let json = render_json(&results).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let entry = &parsed[0];
        assert_eq!(entry["service"], "postgres");
        assert_eq!(entry["status"], "valid");
        assert_eq!(entry["days_until_expiry"], 820);
        assert!(entry.get("message").is_some());
        assert!(entry.get("expiry_date").is_some());
    }

    #[test]
    fn test_end_to_end_two_services() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let engine = OpensslEngine::new();
        let config = test_config();
        let ca = ensure_ca(&engine, &store, &config, false).unwrap();
        issuer::issue(&engine, &store, &config, &ca, "postgres", false).unwrap();
        issuer::issue(&engine, &store, &config, &ca, "redis", false).unwrap();

        let thresholds = Thresholds::new(30, 7).unwrap();
        let results = validate_all(&engine, &store, &thresholds, &["postgres", "redis"]);
        assert!(results.iter().all(|r| r.status == CertStatus::Valid));
        assert_eq!(outcome(&results), Outcome::Pass);
        assert_eq!(outcome(&results).exit_code(), 0);
        assert_eq!(
            render_nagios(&results),
            "OK: All 2 certificates valid | critical=0 warning=0 ok=2"
        );
    }

    #[test]
    fn test_report_lists_every_service() {
        let results = vec![
            result("postgres", CertStatus::Valid, Some(820)),
            result("redis", CertStatus::Missing, None),
        ];
        let report = render_report(&results);
        assert!(report.contains("postgres"));
        assert!(report.contains("missing"));
        assert!(report.contains("Summary: ok=1 warning=0 critical=1"));
    }
}
