//! PKI policy configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is a valid
//! configuration.
//!
//! ```toml
//! organization = "Ministry of Public Security"
//! country = "VN"
//! root_level = "ML-DSA-87"
//!
//! [validity]
//! user_days = 730
//! ```

use std::path::{Path, PathBuf};

use pqc_crypto::SecurityLevel;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Validity terms in days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidityPolicy {
    /// Root CA certificates.
    pub root_days: i64,
    /// Subordinate issuing CA certificates.
    pub subordinate_days: i64,
    /// Registration authority certificates.
    pub ra_days: i64,
    /// Citizen certificates.
    pub user_days: i64,
    /// Service certificates when the caller gives no term.
    pub service_days: i64,
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        Self {
            root_days: 3650,
            subordinate_days: 1825,
            ra_days: 730,
            user_days: 365,
            service_days: 365,
        }
    }
}

/// Configuration for the CA engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    /// `O=` component of generated subject names.
    pub organization: String,
    /// `C=` component of generated subject names.
    pub country: String,
    /// Validity terms.
    pub validity: ValidityPolicy,
    /// Days between a CRL's this-update and next-update.
    pub crl_next_update_days: i64,
    /// Name of the national root CA.
    pub root_name: String,
    /// Label of the national root CA.
    pub root_label: String,
    /// Security level of the national root CA key.
    pub root_level: SecurityLevel,
    /// Name of the CA that issues service certificates.
    pub internal_ca_name: String,
    /// Label marking the CA that issues service certificates.
    pub internal_ca_label: String,
    /// Security level of the internal CA key.
    pub internal_ca_level: SecurityLevel,
    /// Security level of service certificate keys.
    pub service_level: SecurityLevel,
    /// Directory for the registry snapshot; in-memory when absent.
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            organization: "PQC Digital Signature System".to_string(),
            country: "VN".to_string(),
            validity: ValidityPolicy::default(),
            crl_next_update_days: 7,
            root_name: "National Root CA".to_string(),
            root_label: "National Root CA".to_string(),
            root_level: SecurityLevel::MlDsa87,
            internal_ca_name: "Internal Services CA".to_string(),
            internal_ca_label: "Internal CA".to_string(),
            internal_ca_level: SecurityLevel::MlDsa65,
            service_level: SecurityLevel::MlDsa65,
            snapshot_dir: None,
        }
    }
}

impl PkiConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is malformed or invalid.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.organization.trim().is_empty() {
            return Err(Error::Config("organization cannot be empty".into()));
        }
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(Error::Config(format!(
                "country must be a two-letter code, got '{}'",
                self.country
            )));
        }
        for (field, days) in [
            ("validity.root_days", self.validity.root_days),
            ("validity.subordinate_days", self.validity.subordinate_days),
            ("validity.ra_days", self.validity.ra_days),
            ("validity.user_days", self.validity.user_days),
            ("validity.service_days", self.validity.service_days),
            ("crl_next_update_days", self.crl_next_update_days),
        ] {
            if days <= 0 {
                return Err(Error::Config(format!("{field} must be positive")));
            }
        }
        if self.internal_ca_label.trim().is_empty() {
            return Err(Error::Config("internal_ca_label cannot be empty".into()));
        }
        Ok(())
    }

    /// Builds `CN=<common_name>,O=<organization>,C=<country>`.
    #[must_use]
    pub fn subject_dn(&self, common_name: &str) -> String {
        format!("CN={common_name},O={},C={}", self.organization, self.country)
    }

    /// Builds a subject name with an explicit organisation.
    #[must_use]
    pub fn subject_dn_in(&self, common_name: &str, organization: &str) -> String {
        format!("CN={common_name},O={organization},C={}", self.country)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn empty_document_gives_defaults() {
        let config = PkiConfig::from_toml("").unwrap();
        assert_eq!(config, PkiConfig::default());
        assert_eq!(config.validity.root_days, 3650);
        assert_eq!(config.crl_next_update_days, 7);
        assert_eq!(config.root_level, SecurityLevel::MlDsa87);
    }

    #[test]
    fn partial_document_overrides() {
        let config = PkiConfig::from_toml(
            r#"
            organization = "Gov"
            internal_ca_level = "ML-DSA-87"

            [validity]
            user_days = 730
            "#,
        )
        .unwrap();
        assert_eq!(config.organization, "Gov");
        assert_eq!(config.internal_ca_level, SecurityLevel::MlDsa87);
        assert_eq!(config.validity.user_days, 730);
        assert_eq!(config.validity.ra_days, 730);
        assert_eq!(config.subject_dn("Hanoi"), "CN=Hanoi,O=Gov,C=VN");
    }

    #[test_case("country = \"Vietnam\"" ; "long country")]
    #[test_case("organization = \"  \"" ; "blank organization")]
    #[test_case("crl_next_update_days = 0" ; "zero crl interval")]
    #[test_case("[validity]\nuser_days = -1" ; "negative term")]
    #[test_case("root_level = \"RSA\"" ; "unknown level")]
    fn invalid_documents_rejected(text: &str) {
        assert!(matches!(PkiConfig::from_toml(text), Err(Error::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pki.toml");
        std::fs::write(&path, "snapshot_dir = \"/var/lib/pki\"\n").unwrap();
        let config = PkiConfig::from_file(&path).unwrap();
        assert_eq!(config.snapshot_dir, Some(PathBuf::from("/var/lib/pki")));

        assert!(PkiConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
