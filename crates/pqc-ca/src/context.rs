//! Collaborators shared by the engines.

use std::sync::Arc;

use pqc_audit::{AuditEvent, AuditLogger, record_or_warn};
use pqc_crypto::{Certificate, CertificationRequest, CryptoProvider, PrivateKey};
use pqc_custody::KeyCustodyStore;

use crate::authority::{Caller, Permission, require_authority};
use crate::config::PkiConfig;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{CaId, CertificateAuthority};

/// Handles to the registry and the collaborators every engine needs.
///
/// Cheap to clone; engines built from clones of one context share state.
#[derive(Clone)]
pub struct PkiContext {
    registry: Arc<Registry>,
    provider: Arc<dyn CryptoProvider>,
    custody: Arc<dyn KeyCustodyStore>,
    audit: Arc<dyn AuditLogger>,
    config: Arc<PkiConfig>,
}

impl std::fmt::Debug for PkiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkiContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PkiContext {
    /// Creates a context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(
        registry: Arc<Registry>,
        provider: Arc<dyn CryptoProvider>,
        custody: Arc<dyn KeyCustodyStore>,
        audit: Arc<dyn AuditLogger>,
        config: PkiConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            provider,
            custody,
            audit,
            config: Arc::new(config),
        })
    }

    /// The record registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The signing provider.
    #[must_use]
    pub fn provider(&self) -> &dyn CryptoProvider {
        self.provider.as_ref()
    }

    /// A shared handle to the signing provider.
    #[must_use]
    pub fn provider_handle(&self) -> Arc<dyn CryptoProvider> {
        Arc::clone(&self.provider)
    }

    /// The key custody store.
    #[must_use]
    pub fn custody(&self) -> &dyn KeyCustodyStore {
        self.custody.as_ref()
    }

    /// The policy configuration.
    #[must_use]
    pub fn config(&self) -> &PkiConfig {
        &self.config
    }

    /// Records an audit event; sink failures are logged, never returned.
    pub fn audit(&self, event: &AuditEvent) {
        record_or_warn(self.audit.as_ref(), event);
    }

    /// Runs the authority guard for `caller`.
    pub(crate) fn require(
        &self,
        caller: &Caller,
        permission: Permission,
        target: Option<&CertificateAuthority>,
    ) -> Result<()> {
        require_authority(self.audit.as_ref(), caller, permission, target)
    }

    /// Returns a copy of a CA record.
    pub(crate) fn ca(&self, id: CaId) -> Result<CertificateAuthority> {
        self.registry
            .read(|state| state.ca(id).cloned())
            .ok_or_else(|| Error::NotFound(format!("CA {id}")))
    }

    /// Decrypts a CA's private key from custody.
    ///
    /// The key is dropped (and zeroized) by the caller as soon as signing is done.
    pub(crate) fn load_ca_key(&self, ca: &CertificateAuthority) -> Result<PrivateKey> {
        let handle = ca.private_key_handle.as_ref().ok_or_else(|| {
            Error::Validation(format!("CA '{}' does not hold a signing key", ca.name))
        })?;
        let key = self.custody.load_and_decrypt(handle)?;
        if key.level() != ca.algorithm {
            return Err(Error::Crypto(format!(
                "custody key for CA {} is {} but the CA is {}",
                ca.id,
                key.level(),
                ca.algorithm
            )));
        }
        Ok(key)
    }

    /// Parses a CA's own certificate.
    pub(crate) fn ca_certificate(ca: &CertificateAuthority) -> Result<Certificate> {
        Certificate::from_pem(&ca.certificate_pem).map_err(|e| {
            Error::Crypto(format!("stored certificate of CA {} is unreadable: {e}", ca.id))
        })
    }

    /// Parses a request and checks its proof of possession.
    pub(crate) fn parse_csr(&self, csr_pem: &str) -> Result<CertificationRequest> {
        let csr = CertificationRequest::from_pem(csr_pem)?;
        csr.verify_signature(self.provider())
            .map_err(|_| Error::Validation("CSR signature verification failed".into()))?;
        Ok(csr)
    }
}
