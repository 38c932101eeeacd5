//! Session proofs presented when a signing challenge is opened.
//!
//! The session is the first factor: it names the user and must own the key
//! about to be used. The OTP presented at confirmation is the second.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result, UnauthorizedCode};

/// Identity status required before a user may sign.
pub const VERIFIED: &str = "VERIFIED";

/// Shortest accepted HS256 secret.
const MIN_SECRET_LENGTH: usize = 32;

/// Verifies a session token for a key.
pub trait SessionVerifier: Send + Sync {
    /// Returns the username the token proves, if it may use `key_alias`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] for a bad token and
    /// [`Error::Unauthorized`] if the user does not own the key.
    fn verify(&self, token: &str, key_alias: &str) -> Result<String>;
}

/// Whether `username` owns `key_alias`.
///
/// A user owns the alias equal to their name and any alias of the form
/// `<username>_<suffix>`.
#[must_use]
pub fn owns_key(username: &str, key_alias: &str) -> bool {
    key_alias == username
        || key_alias
            .strip_prefix(username)
            .is_some_and(|rest| rest.starts_with('_'))
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Username.
    pub sub: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at time (Unix timestamp).
    pub iat: i64,
    /// Identity proofing state; must be [`VERIFIED`].
    pub identity_status: String,
}

/// HS256 session tokens.
pub struct JwtSessionVerifier {
    secret: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for JwtSessionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSessionVerifier")
            .field("algorithm", &Algorithm::HS256)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl JwtSessionVerifier {
    /// Creates a verifier over a shared secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the secret is shorter than 32 bytes.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(Error::validation(format!(
                "session secret must be at least {MIN_SECRET_LENGTH} bytes for HS256"
            )));
        }
        Ok(Self {
            secret: Zeroizing::new(secret.to_vec()),
        })
    }

    /// Issues a token, as the identity service does after login.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if encoding fails.
    pub fn issue(&self, username: &str, identity_status: &str, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: username.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            identity_status: identity_status.to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| Error::Session { reason: e.to_string() })
    }

    /// Decodes and checks a token's signature and expiry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the token is invalid or expired.
    pub fn claims(&self, token: &str) -> Result<SessionClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.validate_aud = false;

        decode::<SessionClaims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::Session {
                    reason: "session expired".into(),
                },
                _ => Error::Session {
                    reason: format!("invalid session token: {e}"),
                },
            })
    }
}

impl SessionVerifier for JwtSessionVerifier {
    fn verify(&self, token: &str, key_alias: &str) -> Result<String> {
        let claims = self.claims(token)?;
        if claims.identity_status != VERIFIED {
            debug!(user = %claims.sub, status = %claims.identity_status, "identity not verified");
            return Err(Error::Session {
                reason: "identity not verified".into(),
            });
        }
        if !owns_key(&claims.sub, key_alias) {
            return Err(Error::Unauthorized {
                code: UnauthorizedCode::KeyNotOwned,
                reason: format!("{} does not own key {key_alias}", claims.sub),
            });
        }
        Ok(claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn verifier() -> JwtSessionVerifier {
        JwtSessionVerifier::new(SECRET).unwrap()
    }

    #[test_case("alice", "alice", true ; "same name")]
    #[test_case("alice", "alice_signing", true ; "suffixed")]
    #[test_case("alice", "alice-signing", false ; "wrong separator")]
    #[test_case("alice", "alicebob", false ; "prefix only")]
    #[test_case("alice", "bob_alice", false ; "other owner")]
    fn key_ownership(user: &str, alias: &str, expected: bool) {
        assert_eq!(owns_key(user, alias), expected);
    }

    #[test]
    fn verified_session_names_user() {
        let verifier = verifier();
        let token = verifier.issue("alice", VERIFIED, Duration::minutes(10)).unwrap();
        assert_eq!(verifier.verify(&token, "alice_signing").unwrap(), "alice");
    }

    #[test]
    fn foreign_key_is_refused() {
        let verifier = verifier();
        let token = verifier.issue("alice", VERIFIED, Duration::minutes(10)).unwrap();
        assert!(matches!(
            verifier.verify(&token, "bob_signing"),
            Err(Error::Unauthorized { code: UnauthorizedCode::KeyNotOwned, .. })
        ));
    }

    #[test]
    fn unverified_identity_is_refused() {
        let verifier = verifier();
        let token = verifier.issue("alice", "PENDING", Duration::minutes(10)).unwrap();
        assert!(matches!(verifier.verify(&token, "alice"), Err(Error::Session { .. })));
    }

    #[test]
    fn expired_session_is_refused() {
        let verifier = verifier();
        let token = verifier.issue("alice", VERIFIED, Duration::hours(-2)).unwrap();
        let err = verifier.verify(&token, "alice").unwrap_err();
        assert!(matches!(err, Error::Session { ref reason } if reason == "session expired"));
    }

    #[test]
    fn token_from_other_secret_is_refused() {
        let other = JwtSessionVerifier::new(b"ffffffffffffffffffffffffffffffff").unwrap();
        let token = other.issue("alice", VERIFIED, Duration::minutes(10)).unwrap();
        assert!(matches!(verifier().verify(&token, "alice"), Err(Error::Session { .. })));
        assert!(matches!(verifier().verify("not.a.jwt", "alice"), Err(Error::Session { .. })));
    }

    #[test]
    fn short_secret_rejected() {
        assert!(JwtSessionVerifier::new(b"short").is_err());
        assert!(!format!("{:?}", verifier()).contains("0123"));
    }
}
