use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::errors::{PkiError, Result};
use crate::expiry::Thresholds;

const CONFIG_PATH: &str = "certops.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Root directory of the certificate store.
    #[serde(default = "default_cert_root")]
    pub cert_root: PathBuf,
    #[serde(default = "default_warning_days")]
    pub warning_days: i64,
    #[serde(default = "default_critical_days")]
    pub critical_days: i64,
    /// Per-service cap on retained backup pairs; oldest pruned first.
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
    /// Leaf private key size in bits.
    #[serde(default = "default_leaf_key_bits")]
    pub leaf_key_bits: u32,
    /// Webhook endpoint for best-effort rotation notifications.
    #[serde(default)]
    pub notify_url: Option<String>,
    /// Command run after a successful rotation; `{service}` is substituted.
    #[serde(default)]
    pub restart_command: Option<String>,
    #[serde(default)]
    pub ca: CaProfile,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cert_root: default_cert_root(),
            warning_days: default_warning_days(),
            critical_days: default_critical_days(),
            backup_retention: default_backup_retention(),
            leaf_key_bits: default_leaf_key_bits(),
            notify_url: None,
            restart_command: None,
            ca: CaProfile::default(),
        }
    }
}

fn default_cert_root() -> PathBuf {
    PathBuf::from("certs")
}

fn default_warning_days() -> i64 {
    30
}

fn default_critical_days() -> i64 {
    7
}

fn default_backup_retention() -> usize {
    10
}

fn default_leaf_key_bits() -> u32 {
    4096
}

/// Subject profile for the root authority certificate.
#[derive(Debug, Deserialize, Clone)]
pub struct CaProfile {
    #[serde(default = "default_ca_common_name")]
    pub common_name: String,
    #[serde(default = "default_ca_organization")]
    pub organization: String,
    #[serde(default = "default_ca_organizational_unit")]
    pub organizational_unit: String,
    #[serde(default = "default_ca_locality")]
    pub locality: String,
    #[serde(default = "default_ca_state")]
    pub state: String,
    #[serde(default = "default_ca_country")]
    pub country: String,
    #[serde(default = "default_ca_validity_days")]
    pub validity_days: u32,
    #[serde(default = "default_ca_key_bits")]
    pub key_bits: u32,
}

impl Default for CaProfile {
    fn default() -> Self {
        Self {
            common_name: default_ca_common_name(),
            organization: default_ca_organization(),
            organizational_unit: default_ca_organizational_unit(),
            locality: default_ca_locality(),
            state: default_ca_state(),
            country: default_ca_country(),
            validity_days: default_ca_validity_days(),
            key_bits: default_ca_key_bits(),
        }
    }
}

fn default_ca_common_name() -> String {
    "Root CA".to_string()
}

fn default_ca_organization() -> String {
    "Stack Infrastructure".to_string()
}

fn default_ca_organizational_unit() -> String {
    "Platform".to_string()
}

fn default_ca_locality() -> String {
    "San Francisco".to_string()
}

fn default_ca_state() -> String {
    "California".to_string()
}

fn default_ca_country() -> String {
    "US".to_string()
}

fn default_ca_validity_days() -> u32 {
    3650 // 10 years
}

fn default_ca_key_bits() -> u32 {
    4096
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration: `certops.toml` if present, otherwise defaults,
    /// then environment overrides, then the startup precondition checks.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = if Path::new(CONFIG_PATH).exists() {
            Self::from_file(CONFIG_PATH)?
        } else {
            AppConfig::default()
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = env::var("CERTOPS_ROOT") {
            self.cert_root = PathBuf::from(v);
        }
        if let Ok(v) = env::var("CERTOPS_WARNING_DAYS") {
            self.warning_days = parse_env_int("CERTOPS_WARNING_DAYS", &v)?;
        }
        if let Ok(v) = env::var("CERTOPS_CRITICAL_DAYS") {
            self.critical_days = parse_env_int("CERTOPS_CRITICAL_DAYS", &v)?;
        }
        if let Ok(v) = env::var("CERTOPS_BACKUP_RETENTION") {
            let n = parse_env_int("CERTOPS_BACKUP_RETENTION", &v)?;
            self.backup_retention = usize::try_from(n).map_err(|_| {
                PkiError::Config(format!(
                    "CERTOPS_BACKUP_RETENTION must be non-negative, got '{}'",
                    v
                ))
            })?;
        }
        if let Ok(v) = env::var("CERTOPS_NOTIFY_URL") {
            self.notify_url = Some(v);
        }
        if let Ok(v) = env::var("CERTOPS_RESTART_COMMAND") {
            self.restart_command = Some(v);
        }
        Ok(())
    }

    /// Startup preconditions. Threshold ordering is enforced here, not at
    /// classification time.
    pub fn validate(&self) -> Result<()> {
        if self.critical_days >= self.warning_days {
            return Err(PkiError::Config(format!(
                "critical_days ({}) must be strictly below warning_days ({})",
                self.critical_days, self.warning_days
            )));
        }
        if self.ca.key_bits < 4096 {
            return Err(PkiError::Config(format!(
                "CA key size must be at least 4096 bits, got {}",
                self.ca.key_bits
            )));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Result<Thresholds> {
        Thresholds::new(self.warning_days, self.critical_days)
    }
}

fn parse_env_int(name: &str, value: &str) -> Result<i64> {
    value.parse().map_err(|_| {
        PkiError::Config(format!("{} must be an integer, got '{}'", name, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.warning_days, 30);
        assert_eq!(config.critical_days, 7);
        assert_eq!(config.backup_retention, 10);
        assert_eq!(config.ca.key_bits, 4096);
        assert_eq!(config.ca.validity_days, 3650);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let mut config = AppConfig::default();
        config.warning_days = 7;
        config.critical_days = 30;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "config-invalid");
    }

    #[test]
    fn test_weak_ca_key_rejected() {
        let mut config = AppConfig::default();
        config.ca.key_bits = 2048;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_from_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            cert_root = "/srv/certs"
            warning_days = 45

            [ca]
            organization = "Example Org"
            "#,
        )
        .unwrap();
        assert_eq!(config.cert_root, PathBuf::from("/srv/certs"));
        assert_eq!(config.warning_days, 45);
        assert_eq!(config.critical_days, 7);
        assert_eq!(config.ca.organization, "Example Org");
        assert_eq!(config.ca.common_name, "Root CA");
    }
}
