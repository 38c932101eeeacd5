//! Callers, roles and the authority guard run at the top of each operation.

use std::fmt;

use pqc_audit::{AuditAction, AuditEvent, AuditLogger, record_or_warn};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{CaId, CertificateAuthority};

/// Administrative role of a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Full authority over the national hierarchy.
    NationalAdmin,
    /// Full authority; approves policy-level changes.
    PolicyOfficer,
    /// Manages the CAs of one province.
    IssuingOfficer,
    /// Issues citizen certificates from one assigned authority.
    RaOperator,
    /// No CA authority.
    Citizen,
}

impl Role {
    /// Returns the string representation of this role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NationalAdmin => "NATIONAL_ADMIN",
            Self::PolicyOfficer => "POLICY_OFFICER",
            Self::IssuingOfficer => "ISSUING_OFFICER",
            Self::RaOperator => "RA_OPERATOR",
            Self::Citizen => "CITIZEN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action a caller may be allowed to perform on a CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Read CA details.
    View,
    /// Create subordinates and submit creation requests.
    ManageCa,
    /// Approve or reject requests under a CA.
    ApproveRequest,
    /// Issue citizen certificates from a CA.
    IssueUserCert,
    /// Revoke certificates issued by a CA.
    RevokeCertificate,
    /// Revoke a CA and its subtree.
    RevokeCa,
    /// Bootstrap operations with no target CA.
    System,
}

impl Permission {
    /// Returns the string representation of this permission.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::View => "VIEW",
            Self::ManageCa => "MANAGE_CA",
            Self::ApproveRequest => "APPROVE_REQUEST",
            Self::IssueUserCert => "ISSUE_USER_CERT",
            Self::RevokeCertificate => "REVOKE_CERTIFICATE",
            Self::RevokeCa => "REVOKE_CA",
            Self::System => "SYSTEM",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated principal invoking an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    /// Username recorded as the actor of audit events.
    pub username: String,
    /// Administrative role.
    pub role: Role,
    /// Province an issuing officer is limited to.
    #[serde(default)]
    pub province: Option<String>,
    /// Authority an RA operator is limited to.
    #[serde(default)]
    pub assigned_ca: Option<CaId>,
}

impl Caller {
    /// Creates a caller with no province or assignment.
    #[must_use]
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
            province: None,
            assigned_ca: None,
        }
    }

    /// A national administrator.
    #[must_use]
    pub fn national_admin(username: impl Into<String>) -> Self {
        Self::new(username, Role::NationalAdmin)
    }

    /// Limits the caller to one province.
    #[must_use]
    pub fn with_province(mut self, province: impl Into<String>) -> Self {
        self.province = Some(province.into());
        self
    }

    /// Limits the caller to one authority.
    #[must_use]
    pub const fn with_assigned_ca(mut self, ca: CaId) -> Self {
        self.assigned_ca = Some(ca);
        self
    }

    /// Whether the caller holds `permission` over `target`.
    ///
    /// `target` is `None` for operations that act on no existing CA.
    #[must_use]
    pub fn is_allowed(
        &self,
        permission: Permission,
        target: Option<&CertificateAuthority>,
    ) -> bool {
        match self.role {
            Role::NationalAdmin | Role::PolicyOfficer => true,
            Role::IssuingOfficer => {
                permission != Permission::System
                    && target.is_some_and(|ca| {
                        ca.province.is_some() && ca.province == self.province
                    })
            }
            Role::RaOperator => {
                matches!(permission, Permission::View | Permission::IssueUserCert)
                    && target.is_some_and(|ca| Some(ca.id) == self.assigned_ca)
            }
            Role::Citizen => false,
        }
    }
}

/// Fails unless `caller` holds `permission` over `target`.
///
/// A denial is recorded as a failed audit event before returning.
///
/// # Errors
///
/// Returns [`Error::Authorization`] if the caller lacks the permission.
pub fn require_authority(
    audit: &dyn AuditLogger,
    caller: &Caller,
    permission: Permission,
    target: Option<&CertificateAuthority>,
) -> Result<()> {
    if caller.is_allowed(permission, target) {
        return Ok(());
    }

    let target_name = target.map_or_else(|| "system".to_string(), |ca| format!("ca:{}", ca.id));
    warn!(
        user = %caller.username,
        role = %caller.role,
        %permission,
        target = %target_name,
        "authorization denied"
    );
    record_or_warn(
        audit,
        &AuditEvent::failure(&caller.username, AuditAction::AuthorizationDenied, &target_name)
            .with_detail("permission", permission)
            .with_detail("role", caller.role),
    );
    Err(Error::Authorization(format!(
        "{} lacks {permission} on {target_name}",
        caller.username
    )))
}
