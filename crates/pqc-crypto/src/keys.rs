//! Key types.
//!
//! Keys carry their [`SecurityLevel`]. The encoded lengths of ML-DSA keys are
//! distinct per level, so PEM bodies hold only the raw key bytes and the level
//! is recovered from the length on parse.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::level::SecurityLevel;
use crate::pem;

/// An ML-DSA verification key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    level: SecurityLevel,
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Creates a public key, checking the length against the level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the length is wrong for `level`.
    pub fn new(level: SecurityLevel, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != level.public_key_size() {
            return Err(Error::InvalidKey(format!(
                "{level} public key must be {} bytes, got {}",
                level.public_key_size(),
                bytes.len()
            )));
        }
        Ok(Self { level, bytes })
    }

    /// Creates a public key, inferring the level from the length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if no level has this key length.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let level = SecurityLevel::from_public_key_len(bytes.len()).ok_or_else(|| {
            Error::InvalidKey(format!("no ML-DSA public key has length {}", bytes.len()))
        })?;
        Ok(Self { level, bytes })
    }

    /// Parses a `PUBLIC KEY` PEM block.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM or key length is invalid.
    pub fn from_pem(text: &str) -> Result<Self> {
        Self::from_bytes(pem::decode(pem::PUBLIC_KEY, text)?)
    }

    /// Returns the PEM encoding.
    #[must_use]
    pub fn to_pem(&self) -> String {
        pem::encode(pem::PUBLIC_KEY, &self.bytes)
    }

    /// Returns the security level.
    #[must_use]
    pub const fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 fingerprint, lowercase hex.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

/// An ML-DSA signing key with secure memory handling.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    #[zeroize(skip)]
    level: SecurityLevel,
    bytes: Vec<u8>,
}

impl PrivateKey {
    /// Creates a private key, checking the length against the level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the length is wrong for `level`.
    pub fn new(level: SecurityLevel, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != level.private_key_size() {
            return Err(Error::InvalidKey(format!(
                "{level} private key must be {} bytes, got {}",
                level.private_key_size(),
                bytes.len()
            )));
        }
        Ok(Self { level, bytes })
    }

    /// Creates a private key, inferring the level from the length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if no level has this key length.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        match SecurityLevel::from_private_key_len(bytes.len()) {
            Some(level) => Ok(Self { level, bytes }),
            None => {
                let len = bytes.len();
                let mut bytes = bytes;
                bytes.zeroize();
                Err(Error::InvalidKey(format!(
                    "no ML-DSA private key has length {len}"
                )))
            }
        }
    }

    /// Parses a `PRIVATE KEY` PEM block.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM or key length is invalid.
    pub fn from_pem(text: &str) -> Result<Self> {
        Self::from_bytes(pem::decode(pem::PRIVATE_KEY, text)?)
    }

    /// Returns the PEM encoding.
    #[must_use]
    pub fn to_pem(&self) -> String {
        pem::encode(pem::PRIVATE_KEY, &self.bytes)
    }

    /// Returns the security level.
    #[must_use]
    pub const fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("level", &self.level)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            level: self.level,
            bytes: self.bytes.clone(),
        }
    }
}

/// A matching verification/signing key pair.
#[derive(Debug, Clone)]
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl KeyPair {
    /// Pairs two keys of the same level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the levels differ.
    pub fn new(public: PublicKey, private: PrivateKey) -> Result<Self> {
        if public.level() != private.level() {
            return Err(Error::InvalidKey(format!(
                "key pair level mismatch: public {} vs private {}",
                public.level(),
                private.level()
            )));
        }
        Ok(Self { public, private })
    }

    /// Returns the verification key.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Returns the signing key.
    #[must_use]
    pub const fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// Returns the security level.
    #[must_use]
    pub const fn level(&self) -> SecurityLevel {
        self.public.level
    }

    /// Splits the pair.
    #[must_use]
    pub fn into_parts(self) -> (PublicKey, PrivateKey) {
        (self.public, self.private)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_public(level: SecurityLevel) -> PublicKey {
        PublicKey::new(level, vec![1u8; level.public_key_size()]).unwrap()
    }

    fn dummy_private(level: SecurityLevel) -> PrivateKey {
        PrivateKey::new(level, vec![2u8; level.private_key_size()]).unwrap()
    }

    #[test]
    fn public_key_length_is_checked() {
        assert!(PublicKey::new(SecurityLevel::MlDsa65, vec![0u8; 10]).is_err());
        assert!(PublicKey::from_bytes(vec![0u8; 10]).is_err());
    }

    #[test]
    fn public_key_pem_preserves_level() {
        let key = dummy_public(SecurityLevel::MlDsa44);
        let parsed = PublicKey::from_pem(&key.to_pem()).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.level(), SecurityLevel::MlDsa44);
    }

    #[test]
    fn private_key_pem_preserves_level() {
        let key = dummy_private(SecurityLevel::MlDsa87);
        let parsed = PrivateKey::from_pem(&key.to_pem()).unwrap();
        assert_eq!(parsed.level(), SecurityLevel::MlDsa87);
        assert_eq!(parsed.as_bytes(), key.as_bytes());
    }

    #[test]
    fn private_key_debug_redacts() {
        let key = dummy_private(SecurityLevel::MlDsa65);
        let debug = format!("{key:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("2, 2, 2"));
    }

    #[test]
    fn key_pair_rejects_mixed_levels() {
        let result = KeyPair::new(
            dummy_public(SecurityLevel::MlDsa65),
            dummy_private(SecurityLevel::MlDsa87),
        );
        assert!(matches!(result, Err(Error::InvalidKey(_))));
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let key = dummy_public(SecurityLevel::MlDsa65);
        assert_eq!(key.fingerprint(), key.clone().fingerprint());
        assert_eq!(key.fingerprint().len(), 64);
    }
}
