//! The signing capability a confirmed challenge unlocks.

use std::sync::Arc;

use pqc_crypto::{CryptoProvider, SecurityLevel};
use pqc_custody::{KeyCustodyStore, KeyHandle};
use tracing::debug;

use crate::error::{Error, Result};

/// Produces a signature with a user's key.
pub trait SigningCapability: Send + Sync {
    /// Signs `document_hash` with the key behind `key_alias`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown key, [`Error::Validation`]
    /// if the key is not at `algorithm`, or [`Error::Signing`] on failure.
    fn sign(
        &self,
        key_alias: &str,
        document_hash: &[u8],
        algorithm: SecurityLevel,
    ) -> Result<Vec<u8>>;
}

/// Signs with user keys held in a [`KeyCustodyStore`], one handle per alias.
#[derive(Clone)]
pub struct CustodySigner {
    custody: Arc<dyn KeyCustodyStore>,
    provider: Arc<dyn CryptoProvider>,
}

impl std::fmt::Debug for CustodySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodySigner").finish_non_exhaustive()
    }
}

impl CustodySigner {
    /// Creates a signer over a custody store.
    #[must_use]
    pub fn new(custody: Arc<dyn KeyCustodyStore>, provider: Arc<dyn CryptoProvider>) -> Self {
        Self { custody, provider }
    }
}

impl SigningCapability for CustodySigner {
    fn sign(
        &self,
        key_alias: &str,
        document_hash: &[u8],
        algorithm: SecurityLevel,
    ) -> Result<Vec<u8>> {
        let handle = KeyHandle::new(key_alias)?;
        let key = self.custody.load_and_decrypt(&handle)?;
        if key.level() != algorithm {
            return Err(Error::validation(format!(
                "key {key_alias} is {} but {algorithm} was requested",
                key.level()
            )));
        }
        let signature = self.provider.sign(&key, document_hash)?;
        debug!(alias = %key_alias, %algorithm, "signed document hash");
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqc_crypto::MlDsaProvider;
    use pqc_custody::MemoryKeyStore;

    fn signer_with(alias: &str, level: SecurityLevel) -> (CustodySigner, pqc_crypto::PublicKey) {
        let provider = Arc::new(MlDsaProvider::new());
        let custody = Arc::new(MemoryKeyStore::default());
        let pair = provider.generate_key_pair(level).unwrap();
        custody
            .store_with_handle(&KeyHandle::new(alias).unwrap(), pair.private_key())
            .unwrap();
        (CustodySigner::new(custody, provider), pair.public_key().clone())
    }

    #[test]
    fn signs_with_custody_key() {
        let (signer, public) = signer_with("alice_signing", SecurityLevel::MlDsa44);
        let sig = signer.sign("alice_signing", b"digest", SecurityLevel::MlDsa44).unwrap();
        assert!(MlDsaProvider::new().verify(&public, b"digest", &sig));
    }

    #[test]
    fn level_mismatch_is_validation_error() {
        let (signer, _) = signer_with("alice", SecurityLevel::MlDsa44);
        assert!(matches!(
            signer.sign("alice", b"digest", SecurityLevel::MlDsa87),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn unknown_or_unsafe_alias() {
        let (signer, _) = signer_with("alice", SecurityLevel::MlDsa65);
        assert!(matches!(
            signer.sign("bob", b"digest", SecurityLevel::MlDsa65),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            signer.sign("../alice", b"digest", SecurityLevel::MlDsa65),
            Err(Error::Validation { .. })
        ));
    }
}
