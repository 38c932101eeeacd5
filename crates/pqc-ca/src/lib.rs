//! Certificate authority engines for the PQC PKI.
#![forbid(unsafe_code)]
//!
//! Three engines share one [`PkiContext`]: the CA registry plus the signing,
//! key custody and audit collaborators.
//!
//! # Overview
//!
//! - [`CaHierarchy`] creates, activates and revokes CAs, and resolves chains
//! - [`CertificateIssuance`] issues service and citizen certificates, holds
//!   citizen requests for approval and publishes CRLs
//! - [`Countersigning`] applies, verifies and revokes officer stamps over
//!   citizen signatures, optionally timestamped by a [`TimestampAuthority`]
//!
//! Every mutation runs as one [`Registry`] transaction: it commits completely
//! or not at all.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use pqc_audit::MemoryAuditLogger;
//! use pqc_ca::{CaHierarchy, CaKind, Caller, PkiConfig, PkiContext, Registry};
//! use pqc_crypto::MlDsaProvider;
//! use pqc_custody::MemoryKeyStore;
//!
//! let ctx = PkiContext::new(
//!     Arc::new(Registry::in_memory()),
//!     Arc::new(MlDsaProvider::new()),
//!     Arc::new(MemoryKeyStore::default()),
//!     Arc::new(MemoryAuditLogger::new()),
//!     PkiConfig::default(),
//! )
//! .unwrap();
//!
//! let admin = Caller::national_admin("admin");
//! let hierarchy = CaHierarchy::new(ctx);
//! let root = hierarchy.init_root_ca(&admin, "National Root CA").unwrap();
//! let hanoi = hierarchy
//!     .create_subordinate(&admin, root.id, "Hanoi", CaKind::IssuingCa, "ML-DSA-65", None, None)
//!     .unwrap();
//!
//! assert_eq!(hierarchy.chain_of(hanoi.id).len(), 2);
//! ```
//!
//! # Modules
//!
//! - [`hierarchy`] - CA lifecycle and cascading revocation
//! - [`issuance`] - End-entity certificates and CRLs
//! - [`countersign`] - Officer stamps
//! - [`tsa`] - Timestamp tokens
//! - [`registry`] - Transactional record store
//! - [`authority`] - Callers, roles and the authority guard
//! - [`config`] - Policy configuration
//! - [`sanitize`] - Input validation
//! - [`types`] / [`api`] - Records and request/response types
//! - [`error`] - Error types

pub mod api;
pub mod authority;
pub mod config;
pub mod context;
pub mod countersign;
pub mod error;
pub mod hierarchy;
pub mod issuance;
pub mod registry;
pub mod sanitize;
pub mod tsa;
pub mod types;

// Re-export commonly used types at crate root
pub use api::{
    CaSummary, CertificateStats, CsrHandle, IssueUserCertificateRequest, IssuedCertificateSummary,
    RevocationSummary, ServiceCertificate, StampReceipt, StampRequest, StampVerification,
};
pub use authority::{Caller, Permission, Role, require_authority};
pub use config::{PkiConfig, ValidityPolicy};
pub use context::PkiContext;
pub use countersign::{Countersigning, stamp_payload};
pub use error::{Error, Result};
pub use hierarchy::CaHierarchy;
pub use issuance::CertificateIssuance;
pub use registry::{Registry, RegistryState};
pub use tsa::{LocalTsa, TimestampAuthority, TstInfo};
pub use types::{
    CaId, CaKind, CaPendingRequest, CaStatus, CertificateAuthority, CertificateId,
    CertificateStatus, Countersignature, IssuedCertificate, PendingRequestId, PendingStatus,
    StampId, StampPurpose, StampStatus,
};
