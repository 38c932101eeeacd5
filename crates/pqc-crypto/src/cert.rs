//! Certificates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::envelope::{self, Opened};
use crate::error::{Error, Result};
use crate::keys::{KeyPair, PrivateKey, PublicKey};
use crate::level::SecurityLevel;
use crate::pem;
use crate::provider::CryptoProvider;
use crate::serial::generate_serial;

/// Key usage purposes for certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyUsage {
    /// Plain digital signatures.
    DigitalSignature,
    /// Content commitment (document signing).
    NonRepudiation,
    /// Signing certificates.
    KeyCertSign,
    /// Signing revocation lists.
    CrlSign,
    /// TLS server authentication.
    ServerAuth,
    /// TLS client authentication.
    ClientAuth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TbsCertificate {
    version: u8,
    serial_number: String,
    subject: String,
    issuer: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key: PublicKey,
    is_ca: bool,
    path_len: Option<u8>,
    key_usage: Vec<KeyUsage>,
    #[serde(default)]
    dns_names: Vec<String>,
}

/// A signed certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    inner: Opened<TbsCertificate>,
}

impl Certificate {
    /// Parses a certificate from its encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner: Opened<TbsCertificate> = envelope::open(der, "certificate")?;
        if inner.body.not_after <= inner.body.not_before {
            return Err(Error::Parse("certificate validity window is empty".into()));
        }
        Ok(Self {
            der: der.to_vec(),
            inner,
        })
    }

    /// Parses a `CERTIFICATE` PEM block.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM or certificate is malformed.
    pub fn from_pem(text: &str) -> Result<Self> {
        Self::from_der(&pem::decode(pem::CERTIFICATE, text)?)
    }

    /// Returns the encoded certificate bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    #[must_use]
    pub fn to_pem(&self) -> String {
        pem::encode(pem::CERTIFICATE, &self.der)
    }

    /// Returns the serial number (uppercase hex).
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.inner.body.serial_number
    }

    /// Returns the subject distinguished name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.inner.body.subject
    }

    /// Returns the issuer distinguished name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.inner.body.issuer
    }

    /// Returns the certificate validity start time.
    #[must_use]
    pub fn not_before(&self) -> DateTime<Utc> {
        self.inner.body.not_before
    }

    /// Returns the certificate validity end time.
    #[must_use]
    pub fn not_after(&self) -> DateTime<Utc> {
        self.inner.body.not_after
    }

    /// Returns the subject public key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.inner.body.public_key
    }

    /// Returns the level the issuer signed with.
    #[must_use]
    pub fn signature_algorithm(&self) -> SecurityLevel {
        self.inner.signature_algorithm
    }

    /// Whether this is a CA certificate.
    #[must_use]
    pub fn is_ca(&self) -> bool {
        self.inner.body.is_ca
    }

    /// Path length constraint for CA certificates.
    #[must_use]
    pub fn path_len(&self) -> Option<u8> {
        self.inner.body.path_len
    }

    /// Returns the key usages.
    #[must_use]
    pub fn key_usage(&self) -> &[KeyUsage] {
        &self.inner.body.key_usage
    }

    /// Returns the DNS subject alternative names.
    #[must_use]
    pub fn dns_names(&self) -> &[String] {
        &self.inner.body.dns_names
    }

    /// Whether subject and issuer coincide.
    #[must_use]
    pub fn is_self_issued(&self) -> bool {
        self.subject() == self.issuer()
    }

    /// Verifies the certificate signature against an issuer key.
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

/// Builder for new certificates.
#[derive(Debug, Clone)]
pub struct CertificateBuilder {
    subject: String,
    public_key: PublicKey,
    serial: Option<String>,
    not_before: Option<DateTime<Utc>>,
    validity_days: i64,
    is_ca: bool,
    path_len: Option<u8>,
    key_usage: Vec<KeyUsage>,
    dns_names: Vec<String>,
}

impl CertificateBuilder {
    /// Starts a certificate for `subject` over `public_key`, valid 365 days.
    #[must_use]
    pub fn new(subject: impl Into<String>, public_key: PublicKey) -> Self {
        Self {
            subject: subject.into(),
            public_key,
            serial: None,
            not_before: None,
            validity_days: 365,
            is_ca: false,
            path_len: None,
            key_usage: Vec::new(),
            dns_names: Vec::new(),
        }
    }

    /// Uses a specific serial number instead of a random one.
    #[must_use]
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Sets the validity period in days.
    #[must_use]
    pub const fn validity_days(mut self, days: i64) -> Self {
        self.validity_days = days;
        self
    }

    /// Overrides the validity start (defaults to one hour ago for clock skew).
    #[must_use]
    pub const fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    /// Marks the certificate as a CA certificate.
    #[must_use]
    pub fn ca(mut self, path_len: Option<u8>) -> Self {
        self.is_ca = true;
        self.path_len = path_len;
        self.key_usage(KeyUsage::KeyCertSign).key_usage(KeyUsage::CrlSign)
    }

    /// Adds a key usage.
    #[must_use]
    pub fn key_usage(mut self, usage: KeyUsage) -> Self {
        if !self.key_usage.contains(&usage) {
            self.key_usage.push(usage);
        }
        self
    }

    /// Adds a DNS subject alternative name.
    #[must_use]
    pub fn dns(mut self, name: impl Into<String>) -> Self {
        self.dns_names.push(name.into());
        self
    }

    /// Signs the certificate with its own key pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid or signing fails.
    pub fn self_signed(
        self,
        provider: &dyn CryptoProvider,
        key_pair: &KeyPair,
    ) -> Result<Certificate> {
        if key_pair.public_key() != &self.public_key {
            return Err(Error::Validation(
                "self-signed certificate key does not match the key pair".into(),
            ));
        }
        let issuer = self.subject.clone();
        self.sign(provider, issuer, key_pair.private_key())
    }

    /// Signs the certificate with an issuer's key.
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer is not a CA, the key does not belong to
    /// the issuer certificate, or signing fails.
    pub fn signed_by(
        self,
        provider: &dyn CryptoProvider,
        issuer: &Certificate,
        issuer_key: &PrivateKey,
    ) -> Result<Certificate> {
        if !issuer.is_ca() {
            return Err(Error::Validation(format!(
                "issuer '{}' is not a CA certificate",
                issuer.subject()
            )));
        }
        if issuer.public_key().level() != issuer_key.level() {
            return Err(Error::Validation(format!(
                "issuer key level {} does not match issuer certificate level {}",
                issuer_key.level(),
                issuer.public_key().level()
            )));
        }
        self.sign(provider, issuer.subject().to_string(), issuer_key)
    }

    fn sign(
        self,
        provider: &dyn CryptoProvider,
        issuer: String,
        key: &PrivateKey,
    ) -> Result<Certificate> {
        if self.subject.trim().is_empty() {
            return Err(Error::Validation("subject cannot be empty".into()));
        }
        if self.validity_days <= 0 {
            return Err(Error::Validation("validity_days must be greater than 0".into()));
        }

        let now = Utc::now();
        let (not_before, not_after) = match self.not_before {
            Some(at) => (at, at + Duration::days(self.validity_days)),
            None => (now - Duration::hours(1), now + Duration::days(self.validity_days)),
        };
        let mut key_usage = self.key_usage;
        if !key_usage.contains(&KeyUsage::DigitalSignature) {
            key_usage.insert(0, KeyUsage::DigitalSignature);
        }

        let tbs = TbsCertificate {
            version: 3,
            serial_number: self.serial.unwrap_or_else(generate_serial),
            subject: self.subject,
            issuer,
            not_before,
            not_after,
            public_key: self.public_key,
            is_ca: self.is_ca,
            path_len: self.path_len,
            key_usage,
            dns_names: self.dns_names,
        };

        let der = envelope::seal(provider, key, &tbs)?;
        let cert = Certificate::from_der(&der)?;
        debug!(
            subject = cert.subject(),
            issuer = cert.issuer(),
            serial = cert.serial(),
            "certificate signed"
        );
        Ok(cert)
    }
}
