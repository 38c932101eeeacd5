//! Signature provider abstraction and the ML-DSA implementation.
//!
//! [`CryptoProvider`] is the only place raw signing happens. Certificates,
//! requests and revocation lists are built on top of it in their own modules.

use libcrux_ml_dsa::{ml_dsa_44, ml_dsa_65, ml_dsa_87};
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::keys::{KeyPair, PrivateKey, PublicKey};
use crate::level::SecurityLevel;

/// FIPS 204 context string. Empty: the PKI binds domains in the signed bytes.
const CONTEXT: &[u8] = b"";

/// Randomness consumed by key generation and hedged signing.
const SEED_SIZE: usize = 32;

/// Post-quantum signing capability.
pub trait CryptoProvider: Send + Sync {
    /// Generates a fresh key pair at the given level.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    fn generate_key_pair(&self, level: SecurityLevel) -> Result<KeyPair>;

    /// Signs `message` with `key` at the key's level.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is malformed or signing fails.
    fn sign(&self, key: &PrivateKey, message: &[u8]) -> Result<Vec<u8>>;

    /// Verifies `signature` over `message`. Malformed inputs verify as `false`.
    fn verify(&self, key: &PublicKey, message: &[u8], signature: &[u8]) -> bool;
}

/// ML-DSA provider backed by `libcrux-ml-dsa`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlDsaProvider;

impl MlDsaProvider {
    /// Creates the provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn random_seed() -> [u8; SEED_SIZE] {
    let mut seed = [0u8; SEED_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    seed
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("{what} must be {N} bytes, got {}", bytes.len())))
}

fn signing_failed(level: SecurityLevel) -> Error {
    Error::Signing(format!("{level} signing failed"))
}

impl CryptoProvider for MlDsaProvider {
    fn generate_key_pair(&self, level: SecurityLevel) -> Result<KeyPair> {
        let mut seed = random_seed();
        let (public, private) = match level {
            SecurityLevel::MlDsa44 => {
                let pair = ml_dsa_44::generate_key_pair(seed);
                (
                    pair.verification_key.as_ref().to_vec(),
                    pair.signing_key.as_ref().to_vec(),
                )
            }
            SecurityLevel::MlDsa65 => {
                let pair = ml_dsa_65::generate_key_pair(seed);
                (
                    pair.verification_key.as_ref().to_vec(),
                    pair.signing_key.as_ref().to_vec(),
                )
            }
            SecurityLevel::MlDsa87 => {
                let pair = ml_dsa_87::generate_key_pair(seed);
                (
                    pair.verification_key.as_ref().to_vec(),
                    pair.signing_key.as_ref().to_vec(),
                )
            }
        };
        seed.zeroize();

        debug!(%level, "generated key pair");
        KeyPair::new(PublicKey::new(level, public)?, PrivateKey::new(level, private)?)
            .map_err(|e| Error::Generation(e.to_string()))
    }

    fn sign(&self, key: &PrivateKey, message: &[u8]) -> Result<Vec<u8>> {
        let randomness = random_seed();
        let level = key.level();

        let signature = match level {
            SecurityLevel::MlDsa44 => {
                let sk = ml_dsa_44::MLDSA44SigningKey::new(fixed(key.as_bytes(), "signing key")?);
                ml_dsa_44::sign(&sk, message, CONTEXT, randomness)
                    .map_err(|_| signing_failed(level))?
                    .as_ref()
                    .to_vec()
            }
            SecurityLevel::MlDsa65 => {
                let sk = ml_dsa_65::MLDSA65SigningKey::new(fixed(key.as_bytes(), "signing key")?);
                ml_dsa_65::sign(&sk, message, CONTEXT, randomness)
                    .map_err(|_| signing_failed(level))?
                    .as_ref()
                    .to_vec()
            }
            SecurityLevel::MlDsa87 => {
                let sk = ml_dsa_87::MLDSA87SigningKey::new(fixed(key.as_bytes(), "signing key")?);
                ml_dsa_87::sign(&sk, message, CONTEXT, randomness)
                    .map_err(|_| signing_failed(level))?
                    .as_ref()
                    .to_vec()
            }
        };
        Ok(signature)
    }

    fn verify(&self, key: &PublicKey, message: &[u8], signature: &[u8]) -> bool {
        match key.level() {
            SecurityLevel::MlDsa44 => {
                match (fixed(key.as_bytes(), "key"), fixed(signature, "signature")) {
                    (Ok(vk), Ok(sig)) => ml_dsa_44::verify(
                        &ml_dsa_44::MLDSA44VerificationKey::new(vk),
                        message,
                        CONTEXT,
                        &ml_dsa_44::MLDSA44Signature::new(sig),
                    )
                    .is_ok(),
                    _ => false,
                }
            }
            SecurityLevel::MlDsa65 => {
                match (fixed(key.as_bytes(), "key"), fixed(signature, "signature")) {
                    (Ok(vk), Ok(sig)) => ml_dsa_65::verify(
                        &ml_dsa_65::MLDSA65VerificationKey::new(vk),
                        message,
                        CONTEXT,
                        &ml_dsa_65::MLDSA65Signature::new(sig),
                    )
                    .is_ok(),
                    _ => false,
                }
            }
            SecurityLevel::MlDsa87 => {
                match (fixed(key.as_bytes(), "key"), fixed(signature, "signature")) {
                    (Ok(vk), Ok(sig)) => ml_dsa_87::verify(
                        &ml_dsa_87::MLDSA87VerificationKey::new(vk),
                        message,
                        CONTEXT,
                        &ml_dsa_87::MLDSA87Signature::new(sig),
                    )
                    .is_ok(),
                    _ => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::ALL_LEVELS;

    #[test]
    fn sign_verify_all_levels() {
        let provider = MlDsaProvider::new();
        for level in ALL_LEVELS {
            let pair = provider.generate_key_pair(level).unwrap();
            assert_eq!(pair.level(), level);
            assert_eq!(pair.public_key().as_bytes().len(), level.public_key_size());

            let sig = provider.sign(pair.private_key(), b"document").unwrap();
            assert_eq!(sig.len(), level.signature_size());
            assert!(provider.verify(pair.public_key(), b"document", &sig));
            assert!(!provider.verify(pair.public_key(), b"tampered", &sig));
        }
    }

    #[test]
    fn verify_rejects_foreign_key() {
        let provider = MlDsaProvider::new();
        let a = provider.generate_key_pair(SecurityLevel::MlDsa65).unwrap();
        let b = provider.generate_key_pair(SecurityLevel::MlDsa65).unwrap();
        let sig = provider.sign(a.private_key(), b"msg").unwrap();
        assert!(!provider.verify(b.public_key(), b"msg", &sig));
    }

    #[test]
    fn verify_rejects_wrong_length_signature() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        assert!(!provider.verify(pair.public_key(), b"msg", &[0u8; 12]));
    }

    #[test]
    fn signature_from_other_level_is_rejected() {
        let provider = MlDsaProvider::new();
        let low = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        let high = provider.generate_key_pair(SecurityLevel::MlDsa87).unwrap();
        let sig = provider.sign(low.private_key(), b"msg").unwrap();
        assert!(!provider.verify(high.public_key(), b"msg", &sig));
    }

    #[test]
    fn provider_is_object_safe() {
        let provider: Box<dyn CryptoProvider> = Box::new(MlDsaProvider::new());
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa65).unwrap();
        let sig = provider.sign(pair.private_key(), b"x").unwrap();
        assert!(provider.verify(pair.public_key(), b"x", &sig));
    }
}
