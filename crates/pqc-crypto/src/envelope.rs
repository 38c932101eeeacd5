//! Signed envelope shared by certificates, requests and revocation lists.
//!
//! The to-be-signed body is serialised once and the exact bytes are carried
//! alongside the signature, so verification never depends on re-serialising.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::{PrivateKey, PublicKey};
use crate::level::SecurityLevel;
use crate::provider::CryptoProvider;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Wire {
    tbs: String,
    signature_algorithm: SecurityLevel,
    signature: String,
}

/// A decoded envelope.
#[derive(Debug, Clone)]
pub(crate) struct Opened<T> {
    pub body: T,
    pub tbs: Vec<u8>,
    pub signature_algorithm: SecurityLevel,
    pub signature: Vec<u8>,
}

impl<T> Opened<T> {
    /// Checks the signature over the carried bytes.
    pub fn verify(&self, provider: &dyn CryptoProvider, key: &PublicKey) -> Result<()> {
        if key.level() != self.signature_algorithm {
            return Err(Error::SignatureVerification(format!(
                "signed with {} but key is {}",
                self.signature_algorithm,
                key.level()
            )));
        }
        if provider.verify(key, &self.tbs, &self.signature) {
            Ok(())
        } else {
            Err(Error::SignatureVerification("signature does not match".into()))
        }
    }
}

/// Serialises `body`, signs it and returns the envelope bytes.
pub(crate) fn seal<T: Serialize>(
    provider: &dyn CryptoProvider,
    key: &PrivateKey,
    body: &T,
) -> Result<Vec<u8>> {
    let tbs = serde_json::to_vec(body)
        .map_err(|e| Error::Generation(format!("failed to encode body: {e}")))?;
    let signature = provider.sign(key, &tbs)?;
    let wire = Wire {
        tbs: STANDARD.encode(&tbs),
        signature_algorithm: key.level(),
        signature: STANDARD.encode(&signature),
    };
    serde_json::to_vec(&wire)
        .map_err(|e| Error::Generation(format!("failed to encode envelope: {e}")))
}

/// Decodes envelope bytes without checking the signature.
pub(crate) fn open<T: DeserializeOwned>(der: &[u8], what: &str) -> Result<Opened<T>> {
    let wire: Wire = serde_json::from_slice(der)
        .map_err(|e| Error::Parse(format!("malformed {what} envelope: {e}")))?;
    let tbs = STANDARD
        .decode(wire.tbs.as_bytes())
        .map_err(|e| Error::Parse(format!("malformed {what} body encoding: {e}")))?;
    let signature = STANDARD
        .decode(wire.signature.as_bytes())
        .map_err(|e| Error::Parse(format!("malformed {what} signature encoding: {e}")))?;
    let body = serde_json::from_slice(&tbs)
        .map_err(|e| Error::Parse(format!("malformed {what} body: {e}")))?;
    Ok(Opened {
        body,
        tbs,
        signature_algorithm: wire.signature_algorithm,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MlDsaProvider;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Body {
        name: String,
    }

    #[test]
    fn sealed_body_opens_and_verifies() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        let der = seal(&provider, pair.private_key(), &Body { name: "a".into() }).unwrap();

        let opened: Opened<Body> = open(&der, "test").unwrap();
        assert_eq!(opened.body, Body { name: "a".into() });
        opened.verify(&provider, pair.public_key()).unwrap();
    }

    #[test]
    fn tampered_body_fails_verification() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        let der = seal(&provider, pair.private_key(), &Body { name: "a".into() }).unwrap();

        let mut opened: Opened<Body> = open(&der, "test").unwrap();
        opened.tbs = serde_json::to_vec(&Body { name: "b".into() }).unwrap();
        assert!(opened.verify(&provider, pair.public_key()).is_err());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let result: Result<Opened<Body>> = open(b"not json", "test");
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}
