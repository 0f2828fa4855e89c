//! SAN Policy Registry
//!
//! Fixed table of the infrastructure services this authority issues for and
//! the Subject Alternative Names each leaf certificate must cover. The
//! mapping is code-level configuration: changing it is a deploy, not a
//! runtime setting.

use std::fmt;

use crate::errors::{PkiError, Result};

/// Internal DNS zone shared by every service.
pub const INTERNAL_DOMAIN: &str = "stack.internal";

/// Registry order is the batch processing order.
const SERVICES: &[&str] = &["postgres", "pgbouncer", "redis", "rabbitmq", "traefik"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanEntry {
    Dns(String),
    Ip(String),
}

impl fmt::Display for SanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SanEntry::Dns(name) => write!(f, "DNS:{}", name),
            SanEntry::Ip(addr) => write!(f, "IP:{}", addr),
        }
    }
}

/// All registered service names, in registry order.
pub fn service_names() -> impl Iterator<Item = &'static str> {
    SERVICES.iter().copied()
}

pub fn is_known(service: &str) -> bool {
    SERVICES.contains(&service)
}

/// Ordered SAN list a leaf certificate for `service` must cover.
///
/// Every service gets its bare name, its alias inside the internal zone,
/// `localhost`, the internal wildcard, and both loopback addresses. Unknown
/// names fail with [`PkiError::UnknownService`]; batch callers isolate that
/// per service.
pub fn sans_for(service: &str) -> Result<Vec<SanEntry>> {
    if !is_known(service) {
        return Err(PkiError::UnknownService(service.to_string()));
    }
    Ok(vec![
        SanEntry::Dns(service.to_string()),
        SanEntry::Dns(format!("{}.{}", service, INTERNAL_DOMAIN)),
        SanEntry::Dns("localhost".to_string()),
        SanEntry::Dns(format!("*.{}", INTERNAL_DOMAIN)),
        SanEntry::Ip("127.0.0.1".to_string()),
        SanEntry::Ip("::1".to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_service_has_full_san_set() {
        for service in service_names() {
            let sans = sans_for(service).unwrap();
            assert_eq!(sans.len(), 6);
            assert_eq!(sans[0], SanEntry::Dns(service.to_string()));
            assert!(sans.contains(&SanEntry::Dns("localhost".to_string())));
            assert!(sans.contains(&SanEntry::Dns(format!("*.{}", INTERNAL_DOMAIN))));
            assert!(sans.contains(&SanEntry::Ip("127.0.0.1".to_string())));
            assert!(sans.contains(&SanEntry::Ip("::1".to_string())));
        }
    }

    #[test]
    fn test_unknown_service_rejected() {
        let err = sans_for("mongodb").unwrap_err();
        assert_eq!(err.code(), "unknown-service");
    }

    #[test]
    fn test_registry_order_is_stable() {
        let names: Vec<_> = service_names().collect();
        assert_eq!(names, vec!["postgres", "pgbouncer", "redis", "rabbitmq", "traefik"]);
    }
}
