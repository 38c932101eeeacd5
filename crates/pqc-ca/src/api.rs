//! Request and response shapes exchanged with callers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pqc_crypto::SecurityLevel;
use serde::{Deserialize, Serialize};

use crate::types::{
    CaId, CaKind, CaStatus, CertificateAuthority, CertificateId, Countersignature,
    IssuedCertificate, PendingRequestId, StampId, StampPurpose,
};

/// Result of submitting a CSR-based CA creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrHandle {
    /// The pending request to approve, reject or activate.
    pub pending_request_id: PendingRequestId,
    /// The request in PEM form.
    pub csr_pem: String,
}

/// Public view of a CA node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaSummary {
    /// Identifier.
    pub id: CaId,
    /// Display name.
    pub name: String,
    /// Node kind.
    pub kind: CaKind,
    /// Depth in the tree.
    pub hierarchy_level: u32,
    /// Role label.
    pub label: String,
    /// Parent node.
    pub parent_ca: Option<CaId>,
    /// Security level.
    pub algorithm: SecurityLevel,
    /// Lifecycle state.
    pub status: CaStatus,
    /// Subject distinguished name.
    pub subject_dn: String,
    /// End of validity.
    pub valid_until: DateTime<Utc>,
}

impl From<&CertificateAuthority> for CaSummary {
    fn from(ca: &CertificateAuthority) -> Self {
        Self {
            id: ca.id,
            name: ca.name.clone(),
            kind: ca.kind,
            hierarchy_level: ca.hierarchy_level,
            label: ca.label.clone(),
            parent_ca: ca.parent_ca,
            algorithm: ca.algorithm,
            status: ca.status,
            subject_dn: ca.subject_dn.clone(),
            valid_until: ca.valid_until,
        }
    }
}

/// Request to issue a certificate from a citizen CSR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueUserCertificateRequest {
    /// The signing CA.
    pub issuer_id: CaId,
    /// The request in PEM form.
    pub csr: String,
    /// Subject override; the CSR subject is used when absent.
    #[serde(default)]
    pub subject_dn: Option<String>,
}

/// Public view of an issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCertificateSummary {
    /// Identifier.
    pub id: CertificateId,
    /// Serial number.
    pub serial_number: Option<String>,
    /// PEM certificate.
    pub certificate: Option<String>,
    /// End of validity.
    pub valid_until: Option<DateTime<Utc>>,
}

impl From<&IssuedCertificate> for IssuedCertificateSummary {
    fn from(cert: &IssuedCertificate) -> Self {
        Self {
            id: cert.id,
            serial_number: cert.serial_number.clone(),
            certificate: cert.certificate_pem.clone(),
            valid_until: cert.valid_until,
        }
    }
}

/// Outcome of a CA revocation cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationSummary {
    /// The CA the cascade started from.
    pub id: CaId,
    /// Always `REVOKED` on success.
    pub status: CaStatus,
    /// CAs whose status changed, cascade root first.
    pub revoked_cas: Vec<CaId>,
    /// Leaf certificates whose status changed.
    pub revoked_certificates: Vec<CertificateId>,
}

/// A freshly issued service certificate and its private key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCertificate {
    /// PEM certificate.
    pub certificate_pem: String,
    /// PEM private key. Not retained by the CA.
    pub private_key_pem: String,
    /// PEM certificate of the issuing CA.
    pub issuer_certificate_pem: String,
}

impl std::fmt::Debug for ServiceCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCertificate")
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"[REDACTED]")
            .field("issuer_certificate_pem", &self.issuer_certificate_pem)
            .finish()
    }
}

/// Aggregate counts over all issued certificates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateStats {
    /// All records.
    pub total: usize,
    /// Active certificates.
    pub active: usize,
    /// Revoked certificates.
    pub revoked: usize,
    /// Requests awaiting approval.
    pub pending: usize,
}

/// Request to countersign a citizen signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampRequest {
    /// Base64 document hash.
    pub document_hash: String,
    /// Base64 citizen signature over the decoded document hash.
    pub user_signature: String,
    /// Citizen certificate.
    pub user_cert_pem: String,
    /// Officer identity.
    pub officer_id: String,
    /// CA whose key signs the stamp.
    pub officer_ca_id: CaId,
    /// Purpose of the stamp.
    #[serde(default)]
    pub purpose: StampPurpose,
}

/// Caller-facing view of an applied stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampReceipt {
    /// Identifier.
    pub stamp_id: StampId,
    /// Base64 officer signature.
    pub stamp_signature: String,
    /// Officer CA certificate.
    pub officer_cert_pem: String,
    /// Timestamp token, when the TSA answered.
    pub timestamp_token: Option<String>,
    /// When the stamp was applied.
    pub stamped_at: DateTime<Utc>,
    /// Purpose.
    pub purpose: StampPurpose,
}

impl From<&Countersignature> for StampReceipt {
    fn from(stamp: &Countersignature) -> Self {
        Self {
            stamp_id: stamp.id,
            stamp_signature: stamp.officer_signature.clone(),
            officer_cert_pem: stamp.officer_cert_pem.clone(),
            timestamp_token: stamp.timestamp_token.clone(),
            stamped_at: stamp.stamped_at,
            purpose: stamp.purpose,
        }
    }
}

/// Verdict on a countersignature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampVerification {
    /// Whether the stamp is valid now.
    pub valid: bool,
    /// Short verdict.
    pub message: String,
    /// Supporting facts.
    pub details: BTreeMap<String, String>,
}

impl StampVerification {
    pub(crate) fn new(valid: bool, message: &str) -> Self {
        Self {
            valid,
            message: message.to_string(),
            details: BTreeMap::new(),
        }
    }

    pub(crate) fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}
