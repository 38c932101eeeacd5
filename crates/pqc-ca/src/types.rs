//! Core PKI records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use pqc_crypto::SecurityLevel;
use pqc_custody::KeyHandle;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random ", $what, " ID.")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Creates a ", $what, " ID from a UUID.")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| {
                        Error::Validation(format!(concat!("invalid ", $what, " id: {}"), s))
                    })
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a certificate authority.
    CaId,
    "CA"
);
uuid_id!(
    /// Unique identifier for a pending CA creation request.
    PendingRequestId,
    "pending request"
);
uuid_id!(
    /// Unique identifier for an issued certificate.
    CertificateId,
    "certificate"
);
uuid_id!(
    /// Unique identifier for a countersignature.
    StampId,
    "stamp"
);

/// Role of a node in the CA tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaKind {
    /// Signs subordinate CAs and end-entity certificates.
    IssuingCa,
    /// Vouches for and signs end-entity requests; has no subordinates.
    RegistrationAuthority,
    /// Third-party RA holding its own private key.
    ExternalRa,
}

impl CaKind {
    /// Whether nodes of this kind may have subordinates.
    #[must_use]
    pub const fn can_have_subordinates(&self) -> bool {
        matches!(self, Self::IssuingCa)
    }

    /// Returns the string representation of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IssuingCa => "ISSUING_CA",
            Self::RegistrationAuthority => "REGISTRATION_AUTHORITY",
            Self::ExternalRa => "EXTERNAL_RA",
        }
    }
}

impl fmt::Display for CaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaStatus {
    /// In service.
    Active,
    /// Revoked, directly or by cascade.
    Revoked,
    /// Past its validity window.
    Expired,
}

/// A CA or RA node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuthority {
    /// Identifier.
    pub id: CaId,
    /// Display name.
    pub name: String,
    /// Node kind.
    pub kind: CaKind,
    /// Depth in the tree; 0 for the root.
    pub hierarchy_level: u32,
    /// Human-readable role label.
    pub label: String,
    /// Parent node, absent for roots.
    pub parent_ca: Option<CaId>,
    /// Security level of the node's key.
    pub algorithm: SecurityLevel,
    /// PEM public key.
    pub public_key_pem: String,
    /// PEM certificate.
    pub certificate_pem: String,
    /// Custody handle of the private key; never set for external RAs.
    pub private_key_handle: Option<KeyHandle>,
    /// Start of validity.
    pub valid_from: DateTime<Utc>,
    /// End of validity.
    pub valid_until: DateTime<Utc>,
    /// Lifecycle state.
    pub status: CaStatus,
    /// Subject distinguished name.
    pub subject_dn: String,
    /// Province the node serves.
    pub province: Option<String>,
    /// Owning organisation.
    pub organization_id: Option<String>,
    /// When the node was revoked.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Why the node was revoked.
    pub revocation_reason: Option<String>,
}

impl CertificateAuthority {
    /// Whether the node is in service.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == CaStatus::Active
    }

    /// Whether the node is a root of the tree.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_ca.is_none() && self.hierarchy_level == 0
    }
}

/// Lifecycle state of a pending CA creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved or activated.
    Approved,
    /// Rejected.
    Rejected,
}

/// A CSR-based CA creation awaiting approval or external signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaPendingRequest {
    /// Identifier.
    pub id: PendingRequestId,
    /// Requested CA name.
    pub name: String,
    /// Security level of the pre-generated key.
    pub algorithm: SecurityLevel,
    /// The request in PEM form.
    pub csr_pem: String,
    /// Custody handle of the pre-generated key.
    pub private_key_handle: KeyHandle,
    /// Parent CA; absent for the offline root CSR flow.
    pub parent_ca: Option<CaId>,
    /// Who submitted the request.
    pub requested_by: String,
    /// Lifecycle state.
    pub status: PendingStatus,
    /// When the request was submitted.
    pub requested_at: DateTime<Utc>,
    /// When the request was decided.
    pub processed_at: Option<DateTime<Utc>>,
    /// Who decided the request.
    pub processed_by: Option<String>,
    /// Why the request was rejected.
    pub rejection_reason: Option<String>,
    /// The CA created from this request.
    pub activated_ca: Option<CaId>,
}

/// Lifecycle state of an issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    /// Request held, not yet signed.
    Pending,
    /// Signed and in service.
    Active,
    /// Revoked.
    Revoked,
    /// Past its validity window.
    Expired,
    /// Request rejected.
    Rejected,
}

/// An end-entity certificate or a request for one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCertificate {
    /// Identifier.
    pub id: CertificateId,
    /// Issuer of record.
    pub issuing_ca: CaId,
    /// Subject distinguished name.
    pub subject_dn: String,
    /// Serial number, assigned when signed.
    pub serial_number: Option<String>,
    /// PEM certificate, present once signed.
    pub certificate_pem: Option<String>,
    /// PEM public key.
    pub public_key_pem: String,
    /// Held request, present while pending.
    pub csr_pem: Option<String>,
    /// Start of validity, once signed.
    pub valid_from: Option<DateTime<Utc>>,
    /// End of validity, once signed.
    pub valid_until: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub status: CertificateStatus,
    /// When the certificate was revoked.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Why the certificate was revoked.
    pub revocation_reason: Option<String>,
    /// Who requested the certificate.
    pub requested_by: Option<String>,
    /// Why the request was rejected.
    pub rejection_reason: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

/// Purpose of a countersignature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StampPurpose {
    /// Official validation of a citizen signature.
    #[default]
    OfficialValidation,
    /// Notarization.
    Notarization,
    /// Approval.
    Approval,
    /// Certification.
    Certification,
}

impl StampPurpose {
    /// Returns the string representation of this purpose.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OfficialValidation => "OFFICIAL_VALIDATION",
            Self::Notarization => "NOTARIZATION",
            Self::Approval => "APPROVAL",
            Self::Certification => "CERTIFICATION",
        }
    }
}

/// Lifecycle state of a countersignature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StampStatus {
    /// In force.
    Active,
    /// Revoked by an officer.
    Revoked,
    /// Lapsed by policy.
    Expired,
}

/// An officer's countersignature over a citizen's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Countersignature {
    /// Identifier.
    pub id: StampId,
    /// Base64 document hash.
    pub document_hash: String,
    /// Base64 citizen signature over the document hash.
    pub user_signature: String,
    /// Citizen certificate.
    pub user_cert_pem: String,
    /// Base64 officer signature over the stamp payload.
    pub officer_signature: String,
    /// Officer CA certificate.
    pub officer_cert_pem: String,
    /// Officer identity.
    pub officer_id: String,
    /// CA whose key produced the officer signature.
    pub officer_ca: CaId,
    /// Timestamp token over the stamp payload.
    pub timestamp_token: Option<String>,
    /// When the stamp was applied.
    pub stamped_at: DateTime<Utc>,
    /// Purpose.
    pub purpose: StampPurpose,
    /// Lifecycle state.
    pub status: StampStatus,
    /// When the stamp was revoked.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Who revoked the stamp.
    pub revoked_by: Option<String>,
}
