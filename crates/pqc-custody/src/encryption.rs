//! At-rest encryption of private key material.
//!
//! Sealed material is stored as `ENC:` followed by base64 of
//! `nonce || ciphertext || tag` under ChaCha20-Poly1305, keyed per handle by
//! BLAKE3 derivation from the master key. Material without the prefix is
//! treated as legacy plaintext PEM.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use pqc_crypto::PrivateKey;
use rand::RngCore;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};
use crate::handle::KeyHandle;

/// Size of the master key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Prefix marking encrypted material.
pub const ENCRYPTED_PREFIX: &str = "ENC:";

/// Environment variable holding the base64 master key.
pub const MASTER_KEY_ENV: &str = "CA_MASTER_KEY";

/// The process-wide key-encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Generates a new random master key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a master key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMasterKey`] unless exactly 32 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| Error::InvalidMasterKey {
            reason: format!("expected {KEY_SIZE} bytes, got {}", bytes.len()),
        })?;
        Ok(Self { bytes })
    }

    /// Decodes a base64 master key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMasterKey`] if decoding fails or the length is wrong.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(BASE64.decode(encoded.trim()).map_err(|e| {
            Error::InvalidMasterKey {
                reason: format!("not valid base64: {e}"),
            }
        })?);
        Self::from_bytes(&decoded)
    }

    /// Reads the master key from `CA_MASTER_KEY`, if set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMasterKey`] if the variable is set but malformed.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(MASTER_KEY_ENV) {
            Ok(value) if !value.trim().is_empty() => Self::from_base64(&value).map(Some),
            _ => Ok(None),
        }
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    fn derive_for_handle(&self, handle: &KeyHandle) -> Zeroizing<[u8; KEY_SIZE]> {
        let context = format!("pqc-custody v1 {}", handle.as_str());
        Zeroizing::new(blake3::derive_key(&context, &self.bytes))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals and opens private keys for a store backend.
///
/// Without a master key, keys are written as plaintext PEM and a warning is
/// logged on every write.
#[derive(Debug, Clone, Default)]
pub struct KeyEncryptor {
    master: Option<MasterKey>,
}

impl KeyEncryptor {
    /// Creates an encryptor with an optional master key.
    #[must_use]
    pub fn new(master: Option<MasterKey>) -> Self {
        if master.is_none() {
            warn!("no master key configured; CA private keys will be stored unencrypted");
        }
        Self { master }
    }

    /// Creates an encryptor from `CA_MASTER_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is set but malformed.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(MasterKey::from_env()?))
    }

    /// Whether new material will be encrypted.
    #[must_use]
    pub const fn is_encrypting(&self) -> bool {
        self.master.is_some()
    }

    /// Produces the stored form of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionError`] if the cipher fails.
    pub fn seal(&self, handle: &KeyHandle, key: &PrivateKey) -> Result<String> {
        let Some(master) = &self.master else {
            warn!(handle = %handle, "storing private key without encryption");
            return Ok(key.to_pem());
        };

        let derived = master.derive_for_handle(handle);
        let cipher = ChaCha20Poly1305::new_from_slice(&derived[..]).map_err(|e| {
            Error::EncryptionError {
                reason: format!("failed to create cipher: {e}"),
            }
        })?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), key.as_bytes())
            .map_err(|e| Error::EncryptionError {
                reason: format!("encryption failed: {e}"),
            })?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(blob)))
    }

    /// Recovers a private key from its stored form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingMasterKey`] for encrypted material when no
    /// master key is configured, [`Error::EncryptionError`] if authentication
    /// fails, or [`Error::Key`] if the material is not a valid key.
    pub fn open(&self, handle: &KeyHandle, stored: &str) -> Result<PrivateKey> {
        let Some(encoded) = stored.trim().strip_prefix(ENCRYPTED_PREFIX) else {
            warn!(handle = %handle, "loaded legacy unencrypted private key");
            return Ok(PrivateKey::from_pem(stored)?);
        };
        let master = self.master.as_ref().ok_or(Error::MissingMasterKey)?;

        let blob = BASE64.decode(encoded).map_err(|e| Error::EncryptionError {
            reason: format!("sealed material is not valid base64: {e}"),
        })?;
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::EncryptionError {
                reason: format!(
                    "ciphertext too short: expected at least {} bytes, got {}",
                    NONCE_SIZE + TAG_SIZE,
                    blob.len()
                ),
            });
        }

        let derived = master.derive_for_handle(handle);
        let cipher = ChaCha20Poly1305::new_from_slice(&derived[..]).map_err(|e| {
            Error::EncryptionError {
                reason: format!("failed to create cipher: {e}"),
            }
        })?;
        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::EncryptionError {
                reason: format!("decryption failed: {e}"),
            })?;

        Ok(PrivateKey::from_bytes(plaintext)?)
    }
}
