//! Timestamp authority.
//!
//! A token binds a SHA-256 message imprint to a generation time under the
//! authority's signature: `base64(json TstInfo) "|" base64(signature)`, with
//! the signature taken over `SHA-256(json)`.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use pqc_crypto::{CryptoProvider, KeyPair, PublicKey, SecurityLevel, sha256};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Issues and checks timestamp tokens.
pub trait TimestampAuthority: Send + Sync {
    /// Issues a token over `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the authority cannot sign.
    fn issue_token(&self, data: &[u8]) -> Result<String>;

    /// Checks that `token` was issued over `data` by this authority.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the token is malformed.
    fn verify_token(&self, token: &str, data: &[u8]) -> Result<bool>;
}

/// Signed content of a timestamp token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TstInfo {
    /// Token serial, 64-bit hex.
    pub serial_number: String,
    /// When the token was issued.
    pub gen_time: DateTime<Utc>,
    /// Always `SHA-256`.
    pub hash_algorithm: String,
    /// Base64 SHA-256 of the stamped data.
    pub hashed_message: String,
}

impl TstInfo {
    /// Decodes the signed content of a token without checking it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the token is malformed.
    pub fn from_token(token: &str) -> Result<Self> {
        let (info, _) = split(token)?;
        serde_json::from_slice(&info)
            .map_err(|_| Error::Validation("malformed timestamp token".into()))
    }
}

fn split(token: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let malformed = || Error::Validation("malformed timestamp token".into());
    let (info, signature) = token.split_once('|').ok_or_else(malformed)?;
    let info = STANDARD.decode(info).map_err(|_| malformed())?;
    let signature = STANDARD.decode(signature).map_err(|_| malformed())?;
    Ok((info, signature))
}

/// In-process authority holding its own ML-DSA-65 key.
pub struct LocalTsa {
    provider: Arc<dyn CryptoProvider>,
    key_pair: KeyPair,
}

impl std::fmt::Debug for LocalTsa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTsa")
            .field("public_key", &self.key_pair.public_key().fingerprint())
            .finish_non_exhaustive()
    }
}

impl LocalTsa {
    /// Creates an authority with a fresh key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if key generation fails.
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Result<Self> {
        let key_pair = provider.generate_key_pair(SecurityLevel::MlDsa65)?;
        Ok(Self { provider, key_pair })
    }

    /// The key tokens are checked against.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        self.key_pair.public_key()
    }
}

impl TimestampAuthority for LocalTsa {
    fn issue_token(&self, data: &[u8]) -> Result<String> {
        let mut serial = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut serial);
        let info = TstInfo {
            serial_number: hex::encode_upper(serial),
            gen_time: Utc::now(),
            hash_algorithm: "SHA-256".to_string(),
            hashed_message: STANDARD.encode(sha256(data)),
        };
        let json = serde_json::to_vec(&info)
            .map_err(|e| Error::Crypto(format!("failed to encode timestamp: {e}")))?;
        let signature = self.provider.sign(self.key_pair.private_key(), &sha256(&json))?;

        debug!(serial = %info.serial_number, "issued timestamp token");
        Ok(format!("{}|{}", STANDARD.encode(&json), STANDARD.encode(signature)))
    }

    fn verify_token(&self, token: &str, data: &[u8]) -> Result<bool> {
        let (json, signature) = split(token)?;
        let info: TstInfo = serde_json::from_slice(&json)
            .map_err(|_| Error::Validation("malformed timestamp token".into()))?;
        if info.hashed_message != STANDARD.encode(sha256(data)) {
            return Ok(false);
        }
        Ok(self
            .provider
            .verify(self.key_pair.public_key(), &sha256(&json), &signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqc_crypto::MlDsaProvider;

    fn tsa() -> LocalTsa {
        LocalTsa::new(Arc::new(MlDsaProvider::new())).unwrap()
    }

    #[test]
    fn token_verifies_over_same_data() {
        let tsa = tsa();
        let token = tsa.issue_token(b"payload").unwrap();
        assert!(tsa.verify_token(&token, b"payload").unwrap());
        assert!(!tsa.verify_token(&token, b"other").unwrap());

        let info = TstInfo::from_token(&token).unwrap();
        assert_eq!(info.hash_algorithm, "SHA-256");
        assert_eq!(info.serial_number.len(), 16);
    }

    #[test]
    fn foreign_token_rejected() {
        let token = tsa().issue_token(b"payload").unwrap();
        assert!(!tsa().verify_token(&token, b"payload").unwrap());
    }

    #[test]
    fn tampered_info_rejected() {
        let tsa = tsa();
        let token = tsa.issue_token(b"payload").unwrap();
        let (_, signature) = token.split_once('|').unwrap();
        let forged = TstInfo {
            serial_number: "00".into(),
            gen_time: Utc::now(),
            hash_algorithm: "SHA-256".into(),
            hashed_message: STANDARD.encode(sha256(b"payload")),
        };
        let forged = format!(
            "{}|{signature}",
            STANDARD.encode(serde_json::to_vec(&forged).unwrap())
        );
        assert!(!tsa.verify_token(&forged, b"payload").unwrap());
    }

    #[test]
    fn malformed_token_is_validation_error() {
        let tsa = tsa();
        assert!(matches!(tsa.verify_token("no-separator", b"x"), Err(Error::Validation(_))));
        assert!(matches!(tsa.verify_token("%%|%%", b"x"), Err(Error::Validation(_))));
    }
}
