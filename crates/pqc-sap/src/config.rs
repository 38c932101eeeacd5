//! Signature activation configuration.
//!
//! ```toml
//! challenge_ttl_secs = 300
//! max_failed_attempts = 5
//!
//! [totp]
//! digits = 6
//! step_secs = 30
//! skew_steps = 1
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// TOTP parameters (RFC 6238).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TotpConfig {
    /// Digits per code.
    pub digits: u32,
    /// Seconds per time step.
    pub step_secs: u64,
    /// Steps accepted on either side of the current one.
    pub skew_steps: u32,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            digits: 6,
            step_secs: 30,
            skew_steps: 1,
        }
    }
}

/// Configuration for the signing challenge engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SapConfig {
    /// Seconds a challenge stays confirmable.
    pub challenge_ttl_secs: i64,
    /// Wrong OTPs tolerated before a challenge is invalidated.
    pub max_failed_attempts: u32,
    /// OTP parameters.
    pub totp: TotpConfig,
}

impl Default for SapConfig {
    fn default() -> Self {
        Self {
            challenge_ttl_secs: 300,
            max_failed_attempts: 5,
            totp: TotpConfig::default(),
        }
    }
}

impl SapConfig {
    /// Parses a TOML document; absent fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the document is malformed or invalid.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::validation(format!("invalid SAP configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.challenge_ttl_secs <= 0 {
            return Err(Error::validation("challenge_ttl_secs must be positive"));
        }
        if self.max_failed_attempts == 0 {
            return Err(Error::validation("max_failed_attempts must be at least 1"));
        }
        if !(6..=8).contains(&self.totp.digits) {
            return Err(Error::validation("totp.digits must be between 6 and 8"));
        }
        if self.totp.step_secs == 0 {
            return Err(Error::validation("totp.step_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(SapConfig::from_toml("").unwrap(), SapConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config =
            SapConfig::from_toml("challenge_ttl_secs = 120\n[totp]\ndigits = 8\n").unwrap();
        assert_eq!(config.challenge_ttl_secs, 120);
        assert_eq!(config.max_failed_attempts, 5);
        assert_eq!(config.totp.digits, 8);
        assert_eq!(config.totp.step_secs, 30);
    }

    #[test_case("challenge_ttl_secs = 0" ; "zero ttl")]
    #[test_case("max_failed_attempts = 0" ; "no attempts")]
    #[test_case("[totp]\ndigits = 4" ; "short codes")]
    #[test_case("[totp]\nstep_secs = 0" ; "zero step")]
    #[test_case("challenge_ttl_secs = \"soon\"" ; "wrong type")]
    fn invalid_documents_rejected(text: &str) {
        assert!(matches!(SapConfig::from_toml(text), Err(Error::Validation { .. })));
    }
}
