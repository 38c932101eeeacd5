//! Certification requests.
//!
//! A request carries the requested subject and public key, signed by the
//! matching private key as proof of possession.

use serde::{Deserialize, Serialize};

use crate::envelope::{self, Opened};
use crate::error::{Error, Result};
use crate::keys::{KeyPair, PublicKey};
use crate::pem;
use crate::provider::CryptoProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestInfo {
    subject: String,
    public_key: PublicKey,
    #[serde(default)]
    dns_names: Vec<String>,
}

/// A parsed certification request.
#[derive(Debug, Clone)]
pub struct CertificationRequest {
    der: Vec<u8>,
    inner: Opened<RequestInfo>,
}

impl CertificationRequest {
    /// Builds and self-signs a request for `subject`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject is empty or signing fails.
    pub fn build(
        provider: &dyn CryptoProvider,
        subject: impl Into<String>,
        key_pair: &KeyPair,
    ) -> Result<Self> {
        Self::build_with_dns(provider, subject, Vec::new(), key_pair)
    }

    /// Builds and self-signs a request carrying DNS names.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject is empty or signing fails.
    pub fn build_with_dns(
        provider: &dyn CryptoProvider,
        subject: impl Into<String>,
        dns_names: Vec<String>,
        key_pair: &KeyPair,
    ) -> Result<Self> {
        let subject = subject.into();
        if subject.trim().is_empty() {
            return Err(Error::Validation("request subject cannot be empty".into()));
        }
        let info = RequestInfo {
            subject,
            public_key: key_pair.public_key().clone(),
            dns_names,
        };
        let der = envelope::seal(provider, key_pair.private_key(), &info)?;
        Self::from_der(&der)
    }

    /// Parses request bytes without checking proof of possession.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            der: der.to_vec(),
            inner: envelope::open(der, "certification request")?,
        })
    }

    /// Parses a `CERTIFICATE REQUEST` PEM block without checking proof of possession.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM or request is malformed.
    pub fn from_pem(text: &str) -> Result<Self> {
        Self::from_der(&pem::decode(pem::CERTIFICATE_REQUEST, text)?)
    }

    /// Parses a PEM request and checks it is signed by its own key.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails or the self-signature is invalid.
    pub fn from_pem_verified(provider: &dyn CryptoProvider, text: &str) -> Result<Self> {
        let request = Self::from_pem(text)?;
        request.verify_signature(provider)?;
        Ok(request)
    }

    /// Checks the request is signed by the key it carries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SignatureVerification`] if the proof of possession fails.
    pub fn verify_signature(&self, provider: &dyn CryptoProvider) -> Result<()> {
        self.inner.verify(provider, &self.inner.body.public_key)
    }

    /// Returns the requested subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.inner.body.subject
    }

    /// Returns the requested DNS names.
    #[must_use]
    pub fn dns_names(&self) -> &[String] {
        &self.inner.body.dns_names
    }

    /// Returns the embedded public key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.inner.body.public_key
    }

    /// Returns the PEM encoding.
    #[must_use]
    pub fn to_pem(&self) -> String {
        pem::encode(pem::CERTIFICATE_REQUEST, &self.der)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::SecurityLevel;
    use crate::provider::MlDsaProvider;

    #[test]
    fn build_and_parse() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa65).unwrap();
        let csr = CertificationRequest::build(&provider, "CN=Hanoi,O=Gov,C=VN", &pair).unwrap();

        let parsed = CertificationRequest::from_pem_verified(&provider, &csr.to_pem()).unwrap();
        assert_eq!(parsed.subject(), "CN=Hanoi,O=Gov,C=VN");
        assert_eq!(parsed.public_key(), pair.public_key());
        assert_eq!(parsed.public_key().level(), SecurityLevel::MlDsa65);
    }

    #[test]
    fn forged_possession_fails() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        let other = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();

        // A request carrying `other`'s key but signed by `pair`.
        let info = RequestInfo {
            subject: "CN=forged".into(),
            public_key: other.public_key().clone(),
            dns_names: Vec::new(),
        };
        let der = envelope::seal(&provider, pair.private_key(), &info).unwrap();
        let pem_text = pem::encode(pem::CERTIFICATE_REQUEST, &der);

        assert!(CertificationRequest::from_pem(&pem_text).is_ok());
        assert!(matches!(
            CertificationRequest::from_pem_verified(&provider, &pem_text),
            Err(Error::SignatureVerification(_))
        ));
    }

    #[test]
    fn empty_subject_rejected() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        assert!(CertificationRequest::build(&provider, "  ", &pair).is_err());
    }

    #[test]
    fn dns_names_are_carried() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        let csr = CertificationRequest::build_with_dns(
            &provider,
            "CN=api",
            vec!["api.internal".into()],
            &pair,
        )
        .unwrap();
        assert_eq!(csr.dns_names(), ["api.internal".to_string()]);
    }

    #[test]
    fn wrong_label_rejected() {
        let text = pem::encode(pem::CERTIFICATE, b"{}");
        assert!(CertificationRequest::from_pem(&text).is_err());
    }
}
