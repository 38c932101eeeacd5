//! # pqc-audit
//!
//! Audit trail for PKI state changes.
//!
//! - [`AuditEvent`]: who did what to which entity, and whether it took effect
//! - [`AuditLogger`]: pluggable sink trait
//! - [`record_or_warn`]: records without letting a sink failure escape
//!
//! ## Example
//!
//! ```rust
//! use pqc_audit::{AuditAction, AuditEvent, MemoryAuditLogger, record_or_warn};
//!
//! let logger = MemoryAuditLogger::new();
//! let event = AuditEvent::success("admin", AuditAction::CaRevoked, "ca:42")
//!     .with_detail("reason", "key compromise");
//! record_or_warn(&logger, &event);
//! assert_eq!(logger.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod logger;

pub use error::{AuditError, Result};
pub use events::{AuditAction, AuditEvent, Outcome, Severity};
pub use logger::{
    AuditLogger, MemoryAuditLogger, NoopAuditLogger, TracingAuditLogger, record_or_warn,
};
