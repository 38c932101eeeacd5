//! Error types for the signature activation protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code returned to callers for refused signing attempts.
///
/// The internal reason is kept out of the code so a caller cannot tell an
/// expired challenge from a used one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnauthorizedCode {
    /// The OTP or the challenge it was presented for is not acceptable.
    OtpInvalid,
    /// The session does not own the requested key.
    KeyNotOwned,
}

impl UnauthorizedCode {
    /// Returns the string representation of this code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OtpInvalid => "OTP_INVALID",
            Self::KeyNotOwned => "KEY_NOT_OWNED",
        }
    }
}

impl fmt::Display for UnauthorizedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the signature activation protocol.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unsafe input.
    #[error("validation failed: {reason}")]
    Validation {
        /// What was wrong with the input.
        reason: String,
    },

    /// The challenge or key does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// The attempt was refused.
    ///
    /// Only `code` is displayed; `reason` is for server-side logs.
    #[error("unauthorized: {code}")]
    Unauthorized {
        /// Code surfaced to the caller.
        code: UnauthorizedCode,
        /// Internal reason.
        reason: String,
    },

    /// The signing capability failed.
    #[error("signing failed: {reason}")]
    Signing {
        /// The reason signing failed.
        reason: String,
    },

    /// The session proof was rejected.
    #[error("session rejected: {reason}")]
    Session {
        /// The reason the session was rejected.
        reason: String,
    },
}

impl Error {
    pub(crate) fn otp_invalid(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            code: UnauthorizedCode::OtpInvalid,
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }
}

impl From<pqc_crypto::Error> for Error {
    fn from(e: pqc_crypto::Error) -> Self {
        match e {
            pqc_crypto::Error::UnsupportedAlgorithm(name) => Self::Validation {
                reason: format!("unsupported algorithm '{name}'"),
            },
            other => Self::Signing {
                reason: other.to_string(),
            },
        }
    }
}

impl From<pqc_custody::Error> for Error {
    fn from(e: pqc_custody::Error) -> Self {
        match e {
            pqc_custody::Error::InvalidHandle { reason } => Self::Validation { reason },
            pqc_custody::Error::KeyNotFound { handle } => Self::NotFound {
                what: format!("key {handle}"),
            },
            other => Self::Signing {
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for signature activation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_hides_reason() {
        let err = Error::otp_invalid("challenge expired");
        assert_eq!(err.to_string(), "unauthorized: OTP_INVALID");
    }

    #[test]
    fn custody_errors_map_by_kind() {
        let err: Error = pqc_custody::Error::KeyNotFound { handle: "alice".into() }.into();
        assert!(matches!(err, Error::NotFound { .. }));

        let err: Error = pqc_custody::Error::InvalidHandle { reason: "bad".into() }.into();
        assert!(matches!(err, Error::Validation { .. }));

        let err: Error = pqc_custody::Error::MissingMasterKey.into();
        assert!(matches!(err, Error::Signing { .. }));
    }
}
