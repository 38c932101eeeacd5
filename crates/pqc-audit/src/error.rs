//! Error types for the audit trail.

use thiserror::Error;

/// Errors that can occur while recording audit events.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to serialize an event.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink rejected or could not persist the event.
    #[error("audit sink unavailable: {0}")]
    Sink(String),
}

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;
