//! Certificate revocation lists.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{self, Opened};
use crate::error::{Error, Result};
use crate::keys::{PrivateKey, PublicKey};
use crate::pem;
use crate::provider::CryptoProvider;

/// One revoked certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokedEntry {
    /// Serial number of the revoked certificate.
    pub serial_number: String,
    /// When it was revoked.
    pub revoked_at: DateTime<Utc>,
    /// Free-text reason, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TbsCrl {
    issuer: String,
    this_update: DateTime<Utc>,
    next_update: DateTime<Utc>,
    crl_number: i64,
    entries: Vec<RevokedEntry>,
}

/// A signed revocation list.
#[derive(Debug, Clone)]
pub struct Crl {
    der: Vec<u8>,
    inner: Opened<TbsCrl>,
}

impl Crl {
    /// Parses revocation list bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            der: der.to_vec(),
            inner: envelope::open(der, "revocation list")?,
        })
    }

    /// Parses an `X509 CRL` PEM block.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM or list is malformed.
    pub fn from_pem(text: &str) -> Result<Self> {
        Self::from_der(&pem::decode(pem::X509_CRL, text)?)
    }

    /// Returns the PEM encoding.
    #[must_use]
    pub fn to_pem(&self) -> String {
        pem::encode(pem::X509_CRL, &self.der)
    }

    /// Returns the issuer distinguished name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.inner.body.issuer
    }

    /// Returns when the list was produced.
    #[must_use]
    pub fn this_update(&self) -> DateTime<Utc> {
        self.inner.body.this_update
    }

    /// Returns when the next list is due.
    #[must_use]
    pub fn next_update(&self) -> DateTime<Utc> {
        self.inner.body.next_update
    }

    /// Returns the monotonically increasing list number.
    #[must_use]
    pub fn crl_number(&self) -> i64 {
        self.inner.body.crl_number
    }

    /// Returns the revoked entries.
    #[must_use]
    pub fn entries(&self) -> &[RevokedEntry] {
        &self.inner.body.entries
    }

    /// Returns the set of revoked serial numbers.
    #[must_use]
    pub fn revoked_serials(&self) -> BTreeSet<String> {
        self.entries().iter().map(|e| e.serial_number.clone()).collect()
    }

    /// Whether `serial` is listed.
    #[must_use]
    pub fn is_revoked(&self, serial: &str) -> bool {
        self.entries().iter().any(|e| e.serial_number == serial)
    }

    /// Verifies the list signature against the issuer key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SignatureVerification`] if the signature does not verify.
    pub fn verify_signature(
        &self,
        provider: &dyn CryptoProvider,
        issuer_key: &PublicKey,
    ) -> Result<()> {
        self.inner.verify(provider, issuer_key)
    }
}

/// Builder for revocation lists.
#[derive(Debug, Clone)]
pub struct CrlBuilder {
    issuer: String,
    this_update: DateTime<Utc>,
    next_update: DateTime<Utc>,
    crl_number: i64,
    entries: Vec<RevokedEntry>,
}

impl CrlBuilder {
    /// Starts a list for `issuer`, numbered by the current epoch second,
    /// with the next update due in seven days.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            issuer: issuer.into(),
            this_update: now,
            next_update: now + Duration::days(7),
            crl_number: now.timestamp(),
            entries: Vec::new(),
        }
    }

    /// Sets the next-update interval.
    #[must_use]
    pub fn next_update_in(mut self, interval: Duration) -> Self {
        self.next_update = self.this_update + interval;
        self
    }

    /// Sets the list number.
    #[must_use]
    pub const fn crl_number(mut self, number: i64) -> Self {
        self.crl_number = number;
        self
    }

    /// Adds a revoked certificate.
    #[must_use]
    pub fn revoked(
        mut self,
        serial_number: impl Into<String>,
        revoked_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Self {
        self.entries.push(RevokedEntry {
            serial_number: serial_number.into(),
            revoked_at,
            reason,
        });
        self
    }

    /// Signs the list with the issuer key.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is not positive or signing fails.
    pub fn sign(self, provider: &dyn CryptoProvider, issuer_key: &PrivateKey) -> Result<Crl> {
        if self.next_update <= self.this_update {
            return Err(Error::Validation("next update must follow this update".into()));
        }
        let tbs = TbsCrl {
            issuer: self.issuer,
            this_update: self.this_update,
            next_update: self.next_update,
            crl_number: self.crl_number,
            entries: self.entries,
        };
        Crl::from_der(&envelope::seal(provider, issuer_key, &tbs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::SecurityLevel;
    use crate::provider::MlDsaProvider;

    #[test]
    fn signed_list_round_trip() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa65).unwrap();
        let now = Utc::now();

        let crl = CrlBuilder::new("CN=Issuing CA")
            .revoked("0A", now, Some("key compromise".into()))
            .revoked("0B", now, None)
            .sign(&provider, pair.private_key())
            .unwrap();

        let parsed = Crl::from_pem(&crl.to_pem()).unwrap();
        parsed.verify_signature(&provider, pair.public_key()).unwrap();
        assert_eq!(parsed.issuer(), "CN=Issuing CA");
        assert_eq!(parsed.entries().len(), 2);
        assert!(parsed.is_revoked("0A"));
        assert!(!parsed.is_revoked("0C"));
        assert_eq!(
            parsed.revoked_serials().into_iter().collect::<Vec<_>>(),
            vec!["0A".to_string(), "0B".to_string()]
        );
    }

    #[test]
    fn default_next_update_is_seven_days() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        let crl = CrlBuilder::new("CN=CA").sign(&provider, pair.private_key()).unwrap();
        assert_eq!(crl.next_update() - crl.this_update(), Duration::days(7));
        assert!(crl.entries().is_empty());
    }

    #[test]
    fn non_positive_interval_rejected() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        let result = CrlBuilder::new("CN=CA")
            .next_update_in(Duration::zero())
            .sign(&provider, pair.private_key());
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        let other = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        let crl = CrlBuilder::new("CN=CA").sign(&provider, pair.private_key()).unwrap();
        assert!(crl.verify_signature(&provider, other.public_key()).is_err());
    }
}
