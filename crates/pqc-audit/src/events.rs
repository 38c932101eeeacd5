//! Audit event types.
//!
//! One [`AuditEvent`] is emitted per state-changing PKI operation, whether it
//! succeeded or was refused.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Severity level for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine state change.
    Info = 0,
    /// Refused request or recoverable failure.
    Medium = 1,
    /// Revocations and repeated authentication failures.
    High = 2,
    /// Key material or trust-anchor problems.
    Critical = 3,
}

impl Severity {
    /// Returns the string representation of this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// National root CA created.
    RootCaInitialized,
    /// Internal service CA created.
    InternalCaInitialized,
    /// Subordinate CA or RA created directly.
    SubordinateCreated,
    /// Subordinate creation request submitted.
    CaCreationSubmitted,
    /// Subordinate creation request approved.
    CaCreationApproved,
    /// Subordinate creation request rejected.
    CaCreationRejected,
    /// Offline root CSR generated.
    RootCsrGenerated,
    /// CA activated with an externally signed certificate.
    ExternalCertificateActivated,
    /// External RA registered.
    ExternalRaCreated,
    /// CA subtree revoked.
    CaRevoked,
    /// CAs past their validity marked expired.
    CaExpired,
    /// Service certificate issued.
    ServiceCertificateIssued,
    /// User certificate issued.
    UserCertificateIssued,
    /// Pending certificate request recorded.
    CertificateRequested,
    /// Pending certificate request approved.
    CertificateApproved,
    /// Pending certificate request rejected.
    CertificateRejected,
    /// Certificate revoked.
    CertificateRevoked,
    /// Revocation list generated.
    CrlGenerated,
    /// Countersignature applied.
    StampApplied,
    /// Countersignature revoked.
    StampRevoked,
    /// Signing challenge created.
    SigningChallengeCreated,
    /// Signing challenge confirmed and signature produced.
    SigningConfirmed,
    /// Signing challenge cancelled.
    SigningChallengeCancelled,
    /// One-time password rejected.
    OtpRejected,
    /// Caller lacked the required authority.
    AuthorizationDenied,
}

impl AuditAction {
    /// Returns the string representation of this action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RootCaInitialized => "ROOT_CA_INITIALIZED",
            Self::InternalCaInitialized => "INTERNAL_CA_INITIALIZED",
            Self::SubordinateCreated => "SUBORDINATE_CREATED",
            Self::CaCreationSubmitted => "CA_CREATION_SUBMITTED",
            Self::CaCreationApproved => "CA_CREATION_APPROVED",
            Self::CaCreationRejected => "CA_CREATION_REJECTED",
            Self::RootCsrGenerated => "ROOT_CSR_GENERATED",
            Self::ExternalCertificateActivated => "EXTERNAL_CERTIFICATE_ACTIVATED",
            Self::ExternalRaCreated => "EXTERNAL_RA_CREATED",
            Self::CaRevoked => "CA_REVOKED",
            Self::CaExpired => "CA_EXPIRED",
            Self::ServiceCertificateIssued => "SERVICE_CERTIFICATE_ISSUED",
            Self::UserCertificateIssued => "USER_CERTIFICATE_ISSUED",
            Self::CertificateRequested => "CERTIFICATE_REQUESTED",
            Self::CertificateApproved => "CERTIFICATE_APPROVED",
            Self::CertificateRejected => "CERTIFICATE_REJECTED",
            Self::CertificateRevoked => "CERTIFICATE_REVOKED",
            Self::CrlGenerated => "CRL_GENERATED",
            Self::StampApplied => "STAMP_APPLIED",
            Self::StampRevoked => "STAMP_REVOKED",
            Self::SigningChallengeCreated => "SIGNING_CHALLENGE_CREATED",
            Self::SigningConfirmed => "SIGNING_CONFIRMED",
            Self::SigningChallengeCancelled => "SIGNING_CHALLENGE_CANCELLED",
            Self::OtpRejected => "OTP_REJECTED",
            Self::AuthorizationDenied => "AUTHORIZATION_DENIED",
        }
    }

    /// Severity used when an event is created for this action.
    #[must_use]
    pub const fn default_severity(&self) -> Severity {
        match self {
            Self::CaRevoked | Self::CertificateRevoked | Self::StampRevoked => Severity::High,
            Self::AuthorizationDenied | Self::OtpRejected | Self::CaCreationRejected => {
                Severity::Medium
            }
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the audited operation took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The operation took effect.
    Success,
    /// The operation was refused or failed.
    Failure,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failure => "failure",
        })
    }
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    event_id: Uuid,
    timestamp: DateTime<Utc>,
    actor: String,
    action: AuditAction,
    target: String,
    outcome: Outcome,
    severity: Severity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    details: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Creates an event stamped with the current time.
    ///
    /// Failures are raised to at least [`Severity::Medium`].
    #[must_use]
    pub fn new(
        actor: impl Into<String>,
        action: AuditAction,
        target: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        let mut severity = action.default_severity();
        if outcome == Outcome::Failure && severity < Severity::Medium {
            severity = Severity::Medium;
        }
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.into(),
            action,
            target: target.into(),
            outcome,
            severity,
            details: BTreeMap::new(),
        }
    }

    /// Shorthand for a successful event.
    #[must_use]
    pub fn success(
        actor: impl Into<String>,
        action: AuditAction,
        target: impl Into<String>,
    ) -> Self {
        Self::new(actor, action, target, Outcome::Success)
    }

    /// Shorthand for a refused or failed event.
    #[must_use]
    pub fn failure(
        actor: impl Into<String>,
        action: AuditAction,
        target: impl Into<String>,
    ) -> Self {
        Self::new(actor, action, target, Outcome::Failure)
    }

    /// Attaches a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    /// Overrides the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Returns the unique event identifier.
    #[must_use]
    pub const fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Returns when the event was created.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns who performed the operation.
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Returns the operation.
    #[must_use]
    pub const fn action(&self) -> AuditAction {
        self.action
    }

    /// Returns the affected entity.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns whether the operation took effect.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Returns the severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Returns a detail value.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }

    /// Returns all details.
    #[must_use]
    pub const fn details(&self) -> &BTreeMap<String, String> {
        &self.details
    }

    /// Serializes the event to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(AuditAction::CaRevoked, Outcome::Success, Severity::High ; "revocation")]
    #[test_case(AuditAction::StampApplied, Outcome::Success, Severity::Info ; "routine")]
    #[test_case(AuditAction::StampApplied, Outcome::Failure, Severity::Medium ; "failure raised")]
    #[test_case(AuditAction::AuthorizationDenied, Outcome::Failure, Severity::Medium ; "denial")]
    #[test_case(
        AuditAction::CertificateRevoked, Outcome::Failure, Severity::High ;
        "failure keeps higher"
    )]
    fn severity_defaults(action: AuditAction, outcome: Outcome, expected: Severity) {
        let event = AuditEvent::new("admin", action, "ca:1", outcome);
        assert_eq!(event.severity(), expected);
    }

    #[test]
    fn builder_attaches_details() {
        let event = AuditEvent::success("admin", AuditAction::CaRevoked, "ca:1")
            .with_detail("reason", "key compromise")
            .with_detail("cascaded", 3)
            .with_severity(Severity::Critical);

        assert_eq!(event.detail("reason"), Some("key compromise"));
        assert_eq!(event.detail("cascaded"), Some("3"));
        assert_eq!(event.severity(), Severity::Critical);
        assert_eq!(event.actor(), "admin");
        assert_eq!(event.target(), "ca:1");
    }

    #[test]
    fn json_round_trip() {
        let event = AuditEvent::failure("alice", AuditAction::OtpRejected, "challenge:x")
            .with_detail("attempts", 2);
        let json = event.to_json().unwrap();
        assert!(json.contains("\"action\":\"OTP_REJECTED\""));
        assert!(json.contains("\"outcome\":\"failure\""));

        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn event_ids_are_unique() {
        let a = AuditEvent::success("x", AuditAction::CrlGenerated, "ca");
        let b = AuditEvent::success("x", AuditAction::CrlGenerated, "ca");
        assert_ne!(a.event_id(), b.event_id());
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(AuditAction::StampRevoked.to_string(), "STAMP_REVOKED");
        assert_eq!(Severity::High.to_string(), "high");
        assert_eq!(Outcome::Success.to_string(), "success");
        assert!(Severity::Critical > Severity::Info);
    }
}
