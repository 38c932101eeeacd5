//! One-time password verification.
//!
//! [`TotpVerifier`] implements RFC 6238 over HMAC-SHA256 with per-user
//! secrets. There are no bypass codes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::TotpConfig;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Shortest accepted shared secret.
pub const MIN_SECRET_LENGTH: usize = 16;

/// Checks a one-time code against a user's long-lived secret.
pub trait OtpVerifier: Send + Sync {
    /// Returns whether `code` is valid for `username` at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the user has no enrolled secret.
    fn verify(&self, username: &str, code: &str, at: DateTime<Utc>) -> Result<bool>;
}

/// Time-based OTP verifier with an in-memory secret table.
pub struct TotpVerifier {
    config: TotpConfig,
    secrets: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl std::fmt::Debug for TotpVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpVerifier")
            .field("config", &self.config)
            .field("enrolled", &self.secrets.read().len())
            .field("secrets", &"[REDACTED]")
            .finish()
    }
}

impl TotpVerifier {
    /// Creates a verifier with no enrolled users.
    #[must_use]
    pub fn new(config: TotpConfig) -> Self {
        Self {
            config,
            secrets: RwLock::new(HashMap::new()),
        }
    }

    /// Enrolls or replaces a user's secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the secret is shorter than
    /// [`MIN_SECRET_LENGTH`] bytes.
    pub fn enroll(&self, username: &str, secret: &[u8]) -> Result<()> {
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(Error::validation(format!(
                "OTP secret must be at least {MIN_SECRET_LENGTH} bytes"
            )));
        }
        self.secrets
            .write()
            .insert(username.to_string(), Zeroizing::new(secret.to_vec()));
        info!(user = %username, "enrolled OTP secret");
        Ok(())
    }

    /// Removes a user's secret. Returns whether one was enrolled.
    pub fn unenroll(&self, username: &str) -> bool {
        self.secrets.write().remove(username).is_some()
    }

    /// The code for `username` at `at`, as an authenticator would show it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the user has no enrolled secret.
    pub fn code_at(&self, username: &str, at: DateTime<Utc>) -> Result<String> {
        let secrets = self.secrets.read();
        let secret = secrets.get(username).ok_or_else(|| not_enrolled(username))?;
        hotp(secret, self.counter(at), self.config.digits)
    }

    fn counter(&self, at: DateTime<Utc>) -> u64 {
        u64::try_from(at.timestamp()).unwrap_or(0) / self.config.step_secs.max(1)
    }
}

fn not_enrolled(username: &str) -> Error {
    Error::NotFound {
        what: format!("OTP secret for {username}"),
    }
}

/// RFC 4226 HOTP with HMAC-SHA256 and dynamic truncation.
fn hotp(secret: &[u8], counter: u64, digits: u32) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::Signing {
        reason: "OTP secret rejected by HMAC".into(),
    })?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = usize::from(digest[digest.len() - 1] & 0x0f);
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    let code = binary % 10u32.pow(digits);
    Ok(format!("{code:0width$}", width = digits as usize))
}

impl OtpVerifier for TotpVerifier {
    fn verify(&self, username: &str, code: &str, at: DateTime<Utc>) -> Result<bool> {
        let secrets = self.secrets.read();
        let secret = secrets.get(username).ok_or_else(|| not_enrolled(username))?;
        let code = code.trim();
        if code.len() != self.config.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            debug!(user = %username, "OTP has the wrong shape");
            return Ok(false);
        }

        let current = self.counter(at);
        let skew = u64::from(self.config.skew_steps);
        let mut matched = false;
        for counter in current.saturating_sub(skew)..=current.saturating_add(skew) {
            let expected = hotp(secret, counter, self.config.digits)?;
            matched |= bool::from(expected.as_bytes().ct_eq(code.as_bytes()));
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use test_case::test_case;

    const RFC_SECRET: &[u8] = b"12345678901234567890123456789012";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn verifier(digits: u32) -> TotpVerifier {
        let verifier = TotpVerifier::new(TotpConfig {
            digits,
            ..TotpConfig::default()
        });
        verifier.enroll("alice", RFC_SECRET).unwrap();
        verifier
    }

    // RFC 6238 appendix B, SHA-256 column.
    #[test_case(59, "46119246")]
    #[test_case(1_111_111_109, "68084774")]
    #[test_case(1_111_111_111, "67062674")]
    #[test_case(1_234_567_890, "91819424")]
    #[test_case(2_000_000_000, "90698825")]
    #[test_case(20_000_000_000, "77737706")]
    fn rfc6238_vectors(secs: i64, expected: &str) {
        let verifier = verifier(8);
        assert_eq!(verifier.code_at("alice", at(secs)).unwrap(), expected);
        assert!(verifier.verify("alice", expected, at(secs)).unwrap());
    }

    #[test]
    fn adjacent_steps_accepted() {
        let verifier = verifier(6);
        let code = verifier.code_at("alice", at(1_000_000_020)).unwrap();
        assert!(verifier.verify("alice", &code, at(1_000_000_020 - 30)).unwrap());
        assert!(verifier.verify("alice", &code, at(1_000_000_020 + 30)).unwrap());
        assert!(!verifier.verify("alice", &code, at(1_000_000_020 + 90)).unwrap());
    }

    #[test_case("" ; "empty")]
    #[test_case("12345" ; "short")]
    #[test_case("1234567" ; "long")]
    #[test_case("12a456" ; "not digits")]
    fn malformed_codes_rejected(code: &str) {
        assert!(!verifier(6).verify("alice", code, at(59)).unwrap());
    }

    #[test]
    fn secrets_are_per_user() {
        let verifier = verifier(6);
        verifier.enroll("bob", b"another-secret-of-bob").unwrap();
        let alice = verifier.code_at("alice", at(1_700_000_000)).unwrap();
        let bob = verifier.code_at("bob", at(1_700_000_000)).unwrap();
        assert_ne!(alice, bob);
        assert!(matches!(
            verifier.verify("carol", &alice, at(1_700_000_000)),
            Err(Error::NotFound { .. })
        ));

        assert!(verifier.unenroll("bob"));
        assert!(verifier.code_at("bob", at(0)).is_err());
    }

    #[test]
    fn short_secret_rejected() {
        let verifier = TotpVerifier::new(TotpConfig::default());
        assert!(verifier.enroll("alice", b"short").is_err());
        assert!(!format!("{verifier:?}").contains("short"));
    }

    proptest! {
        #[test]
        fn codes_have_fixed_width(secs in 0i64..4_000_000_000, digits in 6u32..=8) {
            let code = verifier(digits).code_at("alice", at(secs)).unwrap();
            prop_assert_eq!(code.len(), digits as usize);
            prop_assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }
}
