//! Error types for key custody.

use thiserror::Error;

/// Errors that can occur in key custody.
#[derive(Debug, Error)]
pub enum Error {
    /// Handle is not a safe storage identifier.
    #[error("invalid key handle: {reason}")]
    InvalidHandle {
        /// The reason the handle is invalid.
        reason: String,
    },

    /// No key stored under the handle.
    #[error("key not found: {handle}")]
    KeyNotFound {
        /// The handle that was not found.
        handle: String,
    },

    /// Encryption or decryption failed.
    #[error("encryption error: {reason}")]
    EncryptionError {
        /// The reason encryption failed.
        reason: String,
    },

    /// Stored material is encrypted but no master key is configured.
    #[error("key material is encrypted but no master key is configured")]
    MissingMasterKey,

    /// Master key configuration is malformed.
    #[error("invalid master key: {reason}")]
    InvalidMasterKey {
        /// The reason the master key was rejected.
        reason: String,
    },

    /// Backend I/O failed.
    #[error("storage error: {reason}")]
    Storage {
        /// The reason the backend failed.
        reason: String,
    },

    /// Decrypted material is not a valid private key.
    #[error(transparent)]
    Key(#[from] pqc_crypto::Error),
}

/// Result type alias for custody operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats_correctly() {
        let err = Error::KeyNotFound {
            handle: "root-ca".to_string(),
        };
        assert_eq!(err.to_string(), "key not found: root-ca");

        let err = Error::InvalidHandle {
            reason: "contains '..'".to_string(),
        };
        assert_eq!(err.to_string(), "invalid key handle: contains '..'");
    }
}
