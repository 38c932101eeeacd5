//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Crypto error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Key or certificate generation failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Parsing of PEM, keys or artifacts failed.
    #[error("parsing failed: {0}")]
    Parse(String),

    /// Input rejected before any cryptographic work.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Key material has the wrong shape for its level.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The algorithm is not one of the supported security levels.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// Certificate has expired.
    #[error("certificate has expired")]
    Expired,

    /// Certificate not yet valid.
    #[error("certificate not yet valid")]
    NotYetValid,

    /// Invalid certificate chain.
    #[error("invalid certificate chain: {0}")]
    InvalidChain(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(Error::Expired.to_string(), "certificate has expired");
        assert_eq!(
            Error::UnsupportedAlgorithm("rsa".into()).to_string(),
            "unsupported algorithm: rsa"
        );
        assert_eq!(
            Error::Parse("bad pem".into()).to_string(),
            "parsing failed: bad pem"
        );
    }
}
