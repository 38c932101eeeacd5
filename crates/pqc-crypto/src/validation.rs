//! Certificate validation utilities.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cert::Certificate;
use crate::error::{Error, Result};
use crate::provider::CryptoProvider;

/// Validates a certificate against its issuing CA certificate.
///
/// This performs the following checks:
/// - The certificate is inside its validity window
/// - The issuer matches the CA's subject
/// - The CA certificate is a CA
/// - The certificate was signed by the CA key
///
/// # Errors
///
/// Returns an error if validation fails.
pub fn validate_certificate(
    provider: &dyn CryptoProvider,
    cert: &Certificate,
    ca_cert: &Certificate,
) -> Result<()> {
    debug!("Validating certificate: {}", cert.subject());

    if is_expired(cert) {
        return Err(Error::Expired);
    }
    if is_not_yet_valid(cert) {
        return Err(Error::NotYetValid);
    }
    if cert.issuer() != ca_cert.subject() {
        return Err(Error::Validation(format!(
            "issuer '{}' does not match CA subject '{}'",
            cert.issuer(),
            ca_cert.subject()
        )));
    }
    if !ca_cert.is_ca() {
        return Err(Error::Validation(format!(
            "'{}' is not a CA certificate",
            ca_cert.subject()
        )));
    }

    cert.verify_signature(provider, ca_cert.public_key())
}

/// Validates a certificate chain ordered from end-entity to root.
///
/// # Errors
///
/// Returns an error if any link is invalid or the last certificate is not a
/// valid self-signed root.
pub fn validate_chain(provider: &dyn CryptoProvider, chain: &[Certificate]) -> Result<()> {
    let Some(root) = chain.last() else {
        return Err(Error::InvalidChain("empty certificate chain".into()));
    };

    for pair in chain.windows(2) {
        validate_certificate(provider, &pair[0], &pair[1])?;
    }

    if !root.is_self_issued() {
        return Err(Error::InvalidChain(format!(
            "chain does not end in a self-signed root (last is '{}')",
            root.subject()
        )));
    }
    validate_certificate(provider, root, root)
}

/// Checks if a certificate is expired.
#[must_use]
pub fn is_expired(cert: &Certificate) -> bool {
    is_expired_at(cert, Utc::now())
}

/// Checks if a certificate is expired at `at`.
#[must_use]
pub fn is_expired_at(cert: &Certificate, at: DateTime<Utc>) -> bool {
    cert.not_after() < at
}

/// Checks if a certificate is not yet valid.
#[must_use]
pub fn is_not_yet_valid(cert: &Certificate) -> bool {
    cert.not_before() > Utc::now()
}

/// Checks if a certificate is currently inside its validity window.
#[must_use]
pub fn is_valid_now(cert: &Certificate) -> bool {
    !is_expired(cert) && !is_not_yet_valid(cert)
}
