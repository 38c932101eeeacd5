//! Error types for the CA engines.

use thiserror::Error;

/// Result type for CA operations.
pub type Result<T> = std::result::Result<T, Error>;

/// CA error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unsafe input. Always raised before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A CA, request, certificate or stamp does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity is not in a state that allows the operation.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// A signing, verification or parsing primitive failed.
    #[error("cryptographic failure: {0}")]
    Crypto(String),

    /// The caller lacks delegated authority for the target.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// A revocation cascade could not be applied in full. Nothing was applied.
    #[error("revocation cascade incomplete: {0}")]
    CascadeFailure(String),

    /// Key custody or registry persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Message safe to return to an external caller.
    ///
    /// Crypto, storage and configuration details stay in the server log.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Crypto(_) => "cryptographic operation failed".to_string(),
            Self::Storage(_) | Self::Config(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<pqc_crypto::Error> for Error {
    fn from(err: pqc_crypto::Error) -> Self {
        use pqc_crypto::Error as E;
        match err {
            E::Validation(msg) | E::UnsupportedAlgorithm(msg) => Self::Validation(msg),
            E::Expired | E::NotYetValid => Self::Validation(err.to_string()),
            other => Self::Crypto(other.to_string()),
        }
    }
}

impl From<pqc_custody::Error> for Error {
    fn from(err: pqc_custody::Error) -> Self {
        use pqc_custody::Error as E;
        match err {
            E::InvalidHandle { reason } => Self::Validation(reason),
            E::Key(inner) => Self::Crypto(inner.to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_message_hides_internals() {
        let err = Error::Crypto("libcrux: bad seed at /var/lib/keys".into());
        assert_eq!(err.public_message(), "cryptographic operation failed");

        let err = Error::Storage("/srv/pki/keys/root.key: permission denied".into());
        assert!(!err.public_message().contains("/srv"));

        let err = Error::StateConflict("request is not pending".into());
        assert_eq!(err.public_message(), "state conflict: request is not pending");
    }

    #[test]
    fn crypto_errors_map_by_kind() {
        assert!(matches!(
            Error::from(pqc_crypto::Error::UnsupportedAlgorithm("rsa".into())),
            Error::Validation(_)
        ));
        assert!(matches!(Error::from(pqc_crypto::Error::Expired), Error::Validation(_)));
        assert!(matches!(
            Error::from(pqc_crypto::Error::Parse("bad pem".into())),
            Error::Crypto(_)
        ));
    }

    #[test]
    fn custody_errors_map_by_kind() {
        assert!(matches!(
            Error::from(pqc_custody::Error::InvalidHandle { reason: "..".into() }),
            Error::Validation(_)
        ));
        assert!(matches!(
            Error::from(pqc_custody::Error::MissingMasterKey),
            Error::Storage(_)
        ));
    }
}
