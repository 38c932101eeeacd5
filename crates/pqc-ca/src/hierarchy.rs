//! CA hierarchy engine.
//!
//! Creates, approves, activates and revokes nodes of the CA tree. Every
//! mutating operation checks the caller's authority first, then validates its
//! input, then does the crypto work outside the registry lock, and finally
//! commits with the preconditions re-checked inside one transaction.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use pqc_audit::{AuditAction, AuditEvent};
use pqc_crypto::{
    Certificate, CertificateBuilder, CertificationRequest, SecurityLevel, is_expired,
    is_not_yet_valid,
};
use pqc_custody::KeyHandle;
use tracing::{debug, info, warn};

use crate::api::{CsrHandle, RevocationSummary};
use crate::authority::{Caller, Permission};
use crate::context::PkiContext;
use crate::error::{Error, Result};
use crate::registry::{RegistryState, subtree};
use crate::sanitize::{sanitize_dn_component, sanitize_reason, sanitize_subject_dn};
use crate::types::{
    CaId, CaKind, CaPendingRequest, CaStatus, CertificateAuthority, CertificateStatus,
    PendingRequestId, PendingStatus,
};

const SUBORDINATE_LABEL: &str = "Subordinate CA";
const RA_LABEL: &str = "Registration Authority";
const SIGNED_BY_ROOT_LABEL: &str = "Subordinate CA (signed by National Root)";
const CHAIN_INCLUDES_ROOT_LABEL: &str = "Subordinate CA (chain includes National Root)";

/// Longest term accepted for an external RA certificate.
pub const MAX_EXTERNAL_RA_DAYS: i64 = 3650;

/// Engine managing the CA tree.
#[derive(Debug, Clone)]
pub struct CaHierarchy {
    ctx: PkiContext,
}

fn target(id: CaId) -> String {
    format!("ca:{id}")
}

fn pending_target(id: PendingRequestId) -> String {
    format!("pending:{id}")
}

/// Checks that `parent` may sign a new subordinate.
fn check_can_issue(parent: &CertificateAuthority) -> Result<()> {
    if parent.kind != CaKind::IssuingCa {
        return Err(Error::Validation("parent is not an issuing CA".into()));
    }
    if !parent.is_active() {
        return Err(Error::Validation("parent CA is not active".into()));
    }
    Ok(())
}

/// Re-checks inside a transaction that the parent is still usable.
fn parent_still_active(state: &RegistryState, parent: CaId) -> Result<()> {
    match state.ca(parent) {
        Some(ca) if ca.is_active() => Ok(()),
        Some(_) => Err(Error::StateConflict("parent CA is no longer active".into())),
        None => Err(Error::NotFound(format!("CA {parent}"))),
    }
}

fn active_root(state: &RegistryState) -> Option<&CertificateAuthority> {
    state.cas().find(|ca| ca.is_root() && ca.is_active())
}

/// Builds the record for a node from its signed certificate.
fn node_from_certificate(
    name: &str,
    kind: CaKind,
    label: &str,
    cert: &Certificate,
    parent: Option<&CertificateAuthority>,
    private_key_handle: Option<KeyHandle>,
) -> CertificateAuthority {
    CertificateAuthority {
        id: CaId::new(),
        name: name.to_string(),
        kind,
        hierarchy_level: parent.map_or(0, |p| p.hierarchy_level + 1),
        label: label.to_string(),
        parent_ca: parent.map(|p| p.id),
        algorithm: cert.public_key().level(),
        public_key_pem: cert.public_key().to_pem(),
        certificate_pem: cert.to_pem(),
        private_key_handle,
        valid_from: cert.not_before(),
        valid_until: cert.not_after(),
        status: CaStatus::Active,
        subject_dn: cert.subject().to_string(),
        province: parent.and_then(|p| p.province.clone()),
        organization_id: parent.and_then(|p| p.organization_id.clone()),
        revoked_at: None,
        revocation_reason: None,
    }
}

impl CaHierarchy {
    /// Creates the engine.
    #[must_use]
    pub const fn new(ctx: PkiContext) -> Self {
        Self { ctx }
    }

    fn discard_key(&self, handle: &KeyHandle) {
        if let Err(e) = self.ctx.custody().delete(handle) {
            warn!(%handle, error = %e, "failed to discard unused CA key");
        }
    }

    /// Stores a fresh key and commits a new node; the key is discarded if the
    /// commit fails or `commit` returns a different node.
    fn commit_with_new_key(
        &self,
        handle: &KeyHandle,
        commit: impl FnOnce(&mut RegistryState) -> Result<CertificateAuthority>,
    ) -> Result<CertificateAuthority> {
        match self.ctx.registry().transaction(commit) {
            Ok(ca) => {
                if ca.private_key_handle.as_ref() != Some(handle) {
                    self.discard_key(handle);
                }
                Ok(ca)
            }
            Err(e) => {
                self.discard_key(handle);
                Err(e)
            }
        }
    }

    /// Creates the national root CA, or returns the active one if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] without the system permission,
    /// [`Error::Validation`] for an unsafe name, or a crypto/storage error.
    pub fn init_root_ca(&self, caller: &Caller, name: &str) -> Result<CertificateAuthority> {
        self.ctx.require(caller, Permission::System, None)?;
        let name = sanitize_dn_component(name, "name")?;
        if let Some(existing) = self.ctx.registry().read(|state| active_root(state).cloned()) {
            debug!(id = %existing.id, "root CA already initialized");
            return Ok(existing);
        }

        let config = self.ctx.config();
        let provider = self.ctx.provider();
        let pair = provider.generate_key_pair(config.root_level)?;
        let cert = CertificateBuilder::new(config.subject_dn(&name), pair.public_key().clone())
            .validity_days(config.validity.root_days)
            .ca(None)
            .self_signed(provider, &pair)?;
        let handle = self.ctx.custody().encrypt_and_store("root-ca", pair.private_key())?;
        let root = node_from_certificate(
            &name,
            CaKind::IssuingCa,
            &config.root_label,
            &cert,
            None,
            Some(handle.clone()),
        );

        let root = self.commit_with_new_key(&handle, |state| {
            if let Some(existing) = active_root(state) {
                return Ok(existing.clone());
            }
            state.insert_ca(root.clone())?;
            Ok(root)
        })?;

        info!(id = %root.id, level = %root.algorithm, "initialized root CA");
        self.ctx.audit(
            &AuditEvent::success(&caller.username, AuditAction::RootCaInitialized, target(root.id))
                .with_detail("algorithm", root.algorithm),
        );
        Ok(root)
    }

    /// Creates the CA that issues service certificates, or returns it if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no active root.
    pub fn init_internal_ca(&self, caller: &Caller) -> Result<CertificateAuthority> {
        self.ctx.require(caller, Permission::System, None)?;
        let config = self.ctx.config();
        let label = config.internal_ca_label.clone();
        let is_internal =
            move |ca: &&CertificateAuthority| ca.label == label && ca.is_active();

        let (existing, root) = self.ctx.registry().read(|state| {
            (
                state.cas().find(&is_internal).cloned(),
                active_root(state).cloned(),
            )
        });
        if let Some(existing) = existing {
            return Ok(existing);
        }
        let root = root.ok_or_else(|| Error::NotFound("no active root CA".into()))?;

        let provider = self.ctx.provider();
        let pair = provider.generate_key_pair(config.internal_ca_level)?;
        let root_cert = PkiContext::ca_certificate(&root)?;
        let root_key = self.ctx.load_ca_key(&root)?;
        let cert = CertificateBuilder::new(
            config.subject_dn(&config.internal_ca_name),
            pair.public_key().clone(),
        )
        .validity_days(config.validity.subordinate_days)
        .ca(Some(0))
        .signed_by(provider, &root_cert, &root_key)?;
        drop(root_key);

        let handle = self.ctx.custody().encrypt_and_store("internal-ca", pair.private_key())?;
        let internal = node_from_certificate(
            &config.internal_ca_name,
            CaKind::IssuingCa,
            &config.internal_ca_label,
            &cert,
            Some(&root),
            Some(handle.clone()),
        );

        let internal = self.commit_with_new_key(&handle, |state| {
            if let Some(existing) = state.cas().find(&is_internal) {
                return Ok(existing.clone());
            }
            parent_still_active(state, root.id)?;
            state.insert_ca(internal.clone())?;
            Ok(internal)
        })?;

        info!(id = %internal.id, "initialized internal CA");
        self.ctx.audit(&AuditEvent::success(
            &caller.username,
            AuditAction::InternalCaInitialized,
            target(internal.id),
        ));
        Ok(internal)
    }

    /// Creates and signs a subordinate issuing CA or RA in one step.
    ///
    /// Province and organisation default to the parent's.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown parent, [`Error::Validation`]
    /// for an unusable parent or bad input, or [`Error::StateConflict`] if the
    /// parent was revoked meanwhile.
    pub fn create_subordinate(
        &self,
        caller: &Caller,
        parent_id: CaId,
        name: &str,
        kind: CaKind,
        algorithm: &str,
        province: Option<&str>,
        organization_id: Option<&str>,
    ) -> Result<CertificateAuthority> {
        let parent = self.ctx.ca(parent_id)?;
        self.ctx.require(caller, Permission::ManageCa, Some(&parent))?;
        let (label, validity_days, path_len, suffix) = match kind {
            CaKind::IssuingCa => (
                SUBORDINATE_LABEL,
                self.ctx.config().validity.subordinate_days,
                None,
                "CA",
            ),
            CaKind::RegistrationAuthority => {
                (RA_LABEL, self.ctx.config().validity.ra_days, Some(0), "RA")
            }
            CaKind::ExternalRa => {
                return Err(Error::Validation(
                    "external RAs are registered from their own CSR".into(),
                ));
            }
        };
        check_can_issue(&parent)?;
        let name = sanitize_dn_component(name, "name")?;
        let level = SecurityLevel::parse_allowed(algorithm)?;
        let province = province.map(|p| sanitize_dn_component(p, "province")).transpose()?;
        let organization_id = organization_id
            .map(|o| sanitize_dn_component(o, "organization"))
            .transpose()?;

        let provider = self.ctx.provider();
        let pair = provider.generate_key_pair(level)?;
        let parent_cert = PkiContext::ca_certificate(&parent)?;
        let parent_key = self.ctx.load_ca_key(&parent)?;
        let cert = CertificateBuilder::new(
            self.ctx.config().subject_dn(&format!("{name} {suffix}")),
            pair.public_key().clone(),
        )
        .validity_days(validity_days)
        .ca(path_len)
        .signed_by(provider, &parent_cert, &parent_key)?;
        drop(parent_key);

        let handle = self.ctx.custody().encrypt_and_store(&name, pair.private_key())?;
        let mut node = node_from_certificate(
            &name,
            kind,
            label,
            &cert,
            Some(&parent),
            Some(handle.clone()),
        );
        if province.is_some() {
            node.province = province;
        }
        if organization_id.is_some() {
            node.organization_id = organization_id;
        }

        let node = self.commit_with_new_key(&handle, |state| {
            parent_still_active(state, parent.id)?;
            state.insert_ca(node.clone())?;
            Ok(node)
        })?;

        info!(id = %node.id, parent = %parent.id, %kind, "created subordinate");
        self.ctx.audit(
            &AuditEvent::success(&caller.username, AuditAction::SubordinateCreated, target(node.id))
                .with_detail("parent", parent.id)
                .with_detail("kind", kind),
        );
        Ok(node)
    }

    /// Generates a key and CSR for a new subordinate and holds them for approval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown parent or [`Error::Validation`]
    /// for an unusable parent, unsafe name or disallowed algorithm.
    pub fn submit_ca_creation(
        &self,
        caller: &Caller,
        parent_id: CaId,
        name: &str,
        algorithm: &str,
    ) -> Result<CsrHandle> {
        let parent = self.ctx.ca(parent_id)?;
        self.ctx.require(caller, Permission::ManageCa, Some(&parent))?;
        check_can_issue(&parent)?;
        let name = sanitize_dn_component(name, "name")?;
        let level = SecurityLevel::parse_allowed(algorithm)?;

        let handle = self.hold_request(
            caller,
            &name,
            level,
            Some(parent.id),
            AuditAction::CaCreationSubmitted,
        )?;
        info!(
            pending = %handle.pending_request_id,
            parent = %parent.id,
            "submitted CA creation request"
        );
        Ok(handle)
    }

    /// Generates a key and CSR for an offline-signed CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an unsafe name or disallowed algorithm.
    pub fn init_root_csr(&self, caller: &Caller, name: &str, algorithm: &str) -> Result<CsrHandle> {
        self.ctx.require(caller, Permission::System, None)?;
        let name = sanitize_dn_component(name, "name")?;
        let level = SecurityLevel::parse_allowed(algorithm)?;

        let handle = self.hold_request(caller, &name, level, None, AuditAction::RootCsrGenerated)?;
        info!(pending = %handle.pending_request_id, "generated offline CSR");
        Ok(handle)
    }

    fn hold_request(
        &self,
        caller: &Caller,
        name: &str,
        level: SecurityLevel,
        parent: Option<CaId>,
        action: AuditAction,
    ) -> Result<CsrHandle> {
        let provider = self.ctx.provider();
        let pair = provider.generate_key_pair(level)?;
        let csr = CertificationRequest::build(provider, self.ctx.config().subject_dn(name), &pair)?;
        let key_handle = self.ctx.custody().encrypt_and_store(name, pair.private_key())?;

        let request = CaPendingRequest {
            id: PendingRequestId::new(),
            name: name.to_string(),
            algorithm: level,
            csr_pem: csr.to_pem(),
            private_key_handle: key_handle.clone(),
            parent_ca: parent,
            requested_by: caller.username.clone(),
            status: PendingStatus::Pending,
            requested_at: Utc::now(),
            processed_at: None,
            processed_by: None,
            rejection_reason: None,
            activated_ca: None,
        };
        let committed = self.ctx.registry().transaction(|state| {
            state.insert_pending(request.clone());
            Ok(())
        });
        if let Err(e) = committed {
            self.discard_key(&key_handle);
            return Err(e);
        }

        let mut event = AuditEvent::success(&caller.username, action, pending_target(request.id))
            .with_detail("algorithm", level);
        if let Some(parent) = parent {
            event = event.with_detail("parent", parent);
        }
        self.ctx.audit(&event);
        Ok(CsrHandle {
            pending_request_id: request.id,
            csr_pem: request.csr_pem,
        })
    }

    fn pending(&self, id: PendingRequestId) -> Result<CaPendingRequest> {
        self.ctx
            .registry()
            .read(|state| state.pending(id).cloned())
            .ok_or_else(|| Error::NotFound(format!("pending request {id}")))
    }

    /// Authority over a request rests with its parent; parentless requests need
    /// the system permission.
    fn require_for_request(
        &self,
        caller: &Caller,
        request: &CaPendingRequest,
    ) -> Result<Option<CertificateAuthority>> {
        match request.parent_ca {
            Some(parent_id) => {
                let parent = self.ctx.ca(parent_id)?;
                self.ctx.require(caller, Permission::ApproveRequest, Some(&parent))?;
                Ok(Some(parent))
            }
            None => {
                self.ctx.require(caller, Permission::System, None)?;
                Ok(None)
            }
        }
    }

    /// Commits an activated node and closes its request in one step.
    fn activate(
        &self,
        request_id: PendingRequestId,
        node: CertificateAuthority,
        processed_by: &str,
    ) -> Result<CertificateAuthority> {
        let now = Utc::now();
        self.ctx.registry().transaction(|state| {
            let request = state
                .pending(request_id)
                .ok_or_else(|| Error::NotFound(format!("pending request {request_id}")))?;
            if request.status != PendingStatus::Pending {
                return Err(Error::StateConflict("request is not pending".into()));
            }
            if let Some(parent) = node.parent_ca {
                parent_still_active(state, parent)?;
            }
            state.insert_ca(node.clone())?;
            if let Some(request) = state.pending_mut(request_id) {
                request.status = PendingStatus::Approved;
                request.processed_at = Some(now);
                request.processed_by = Some(processed_by.to_string());
                request.activated_ca = Some(node.id);
            }
            Ok(node)
        })
    }

    /// Signs a held request with its parent's key and activates the new CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] if the request is not pending, has no
    /// parent, or lost a race with another decision.
    pub fn approve_ca_creation(
        &self,
        caller: &Caller,
        request_id: PendingRequestId,
    ) -> Result<CertificateAuthority> {
        let request = self.pending(request_id)?;
        let parent = self.require_for_request(caller, &request)?;
        if request.status != PendingStatus::Pending {
            return Err(Error::StateConflict("request is not pending".into()));
        }
        let parent = parent.ok_or_else(|| {
            Error::StateConflict(
                "offline requests are activated with an externally signed certificate".into(),
            )
        })?;
        check_can_issue(&parent)?;

        let provider = self.ctx.provider();
        let csr = CertificationRequest::from_pem(&request.csr_pem)?;
        let parent_cert = PkiContext::ca_certificate(&parent)?;
        let parent_key = self.ctx.load_ca_key(&parent)?;
        let cert = CertificateBuilder::new(
            self.ctx.config().subject_dn(&format!("{} CA", request.name)),
            csr.public_key().clone(),
        )
        .validity_days(self.ctx.config().validity.subordinate_days)
        .ca(None)
        .signed_by(provider, &parent_cert, &parent_key)?;
        drop(parent_key);

        let node = node_from_certificate(
            &request.name,
            CaKind::IssuingCa,
            SUBORDINATE_LABEL,
            &cert,
            Some(&parent),
            Some(request.private_key_handle.clone()),
        );
        let node = self.activate(request_id, node, &caller.username)?;

        info!(
            id = %node.id,
            parent = %parent.id,
            level = node.hierarchy_level,
            "approved CA creation"
        );
        self.ctx.audit(
            &AuditEvent::success(
                &caller.username,
                AuditAction::CaCreationApproved,
                pending_target(request_id),
            )
            .with_detail("ca", node.id),
        );
        Ok(node)
    }

    /// Rejects a held request. The pre-generated key is left in custody.
    ///
    /// The caller is recorded as the rejector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] if the request is not pending.
    pub fn reject_ca_creation(
        &self,
        caller: &Caller,
        request_id: PendingRequestId,
        reason: &str,
    ) -> Result<CaPendingRequest> {
        let request = self.pending(request_id)?;
        self.require_for_request(caller, &request)?;
        let reason = sanitize_reason(reason)?;
        let now = Utc::now();

        let request = self.ctx.registry().transaction(|state| {
            let request = state
                .pending_mut(request_id)
                .ok_or_else(|| Error::NotFound(format!("pending request {request_id}")))?;
            if request.status != PendingStatus::Pending {
                return Err(Error::StateConflict("request is not pending".into()));
            }
            request.status = PendingStatus::Rejected;
            request.rejection_reason = Some(reason.clone());
            request.processed_at = Some(now);
            request.processed_by = Some(caller.username.clone());
            Ok(request.clone())
        })?;

        info!(pending = %request_id, "rejected CA creation");
        self.ctx.audit(
            &AuditEvent::success(
                &caller.username,
                AuditAction::CaCreationRejected,
                pending_target(request_id),
            )
            .with_detail("reason", &reason),
        );
        Ok(request)
    }

    /// Activates a held request with a certificate signed outside this system.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] for an unreadable certificate and
    /// [`Error::Validation`] if it is outside its validity window, certifies a
    /// different key, or does not verify against its issuer. A request with a
    /// parent is checked against the parent's certificate; `trust_anchor_pem`
    /// only applies to parentless requests.
    pub fn activate_with_externally_signed_cert(
        &self,
        caller: &Caller,
        pending_id: PendingRequestId,
        cert_pem: &str,
        trust_anchor_pem: Option<&str>,
    ) -> Result<CertificateAuthority> {
        let request = self.pending(pending_id)?;
        let parent = self.require_for_request(caller, &request)?;
        if request.status != PendingStatus::Pending {
            return Err(Error::StateConflict("request is not pending".into()));
        }

        let cert = Certificate::from_pem(cert_pem)?;
        if is_expired(&cert) {
            return Err(Error::Validation("certificate has expired".into()));
        }
        if is_not_yet_valid(&cert) {
            return Err(Error::Validation("certificate is not yet valid".into()));
        }
        let csr = CertificationRequest::from_pem(&request.csr_pem)?;
        if cert.public_key() != csr.public_key() {
            return Err(Error::Validation(
                "certificate does not certify the pending request's key".into(),
            ));
        }
        let label = match (&parent, trust_anchor_pem) {
            // Requests made under a parent must carry that parent's signature.
            (Some(parent), _) => {
                let issuer = PkiContext::ca_certificate(parent)?;
                cert.verify_signature(self.ctx.provider(), issuer.public_key())
                    .map_err(|_| {
                        Error::Validation("certificate is not signed by the parent CA".into())
                    })?;
                SUBORDINATE_LABEL
            }
            (None, Some(anchor_pem)) => {
                let anchor = Certificate::from_pem(anchor_pem)?;
                cert.verify_signature(self.ctx.provider(), anchor.public_key())
                    .map_err(|_| {
                        Error::Validation("certificate is not signed by the trust anchor".into())
                    })?;
                CHAIN_INCLUDES_ROOT_LABEL
            }
            (None, None) => SIGNED_BY_ROOT_LABEL,
        };

        let mut node = node_from_certificate(
            &request.name,
            CaKind::IssuingCa,
            label,
            &cert,
            parent.as_ref(),
            Some(request.private_key_handle.clone()),
        );
        if parent.is_none() {
            node.hierarchy_level = 1;
        }
        let node = self.activate(pending_id, node, &caller.username)?;

        info!(
            id = %node.id,
            anchored = trust_anchor_pem.is_some(),
            "activated externally signed CA"
        );
        self.ctx.audit(
            &AuditEvent::success(
                &caller.username,
                AuditAction::ExternalCertificateActivated,
                pending_target(pending_id),
            )
            .with_detail("ca", node.id)
            .with_detail("issuer", cert.issuer()),
        );
        Ok(node)
    }

    /// Signs a third party's CSR as an RA that keeps its own key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an unusable parent, bad input or a
    /// term outside 1 to 3650 days.
    pub fn create_external_ra(
        &self,
        caller: &Caller,
        parent_id: CaId,
        name: &str,
        csr_pem: &str,
        label: &str,
        valid_days: i64,
    ) -> Result<CertificateAuthority> {
        let parent = self.ctx.ca(parent_id)?;
        self.ctx.require(caller, Permission::ManageCa, Some(&parent))?;
        check_can_issue(&parent)?;
        let name = sanitize_dn_component(name, "name")?;
        let label = sanitize_dn_component(label, "label")?;
        if !(1..=MAX_EXTERNAL_RA_DAYS).contains(&valid_days) {
            return Err(Error::Validation(format!(
                "valid_days must be between 1 and {MAX_EXTERNAL_RA_DAYS}"
            )));
        }
        let csr = self.ctx.parse_csr(csr_pem)?;
        let subject = sanitize_subject_dn(csr.subject())?;

        let parent_cert = PkiContext::ca_certificate(&parent)?;
        let parent_key = self.ctx.load_ca_key(&parent)?;
        let cert = CertificateBuilder::new(subject, csr.public_key().clone())
            .validity_days(valid_days)
            .ca(Some(0))
            .signed_by(self.ctx.provider(), &parent_cert, &parent_key)?;
        drop(parent_key);

        let node = node_from_certificate(
            &name,
            CaKind::ExternalRa,
            &label,
            &cert,
            Some(&parent),
            None,
        );
        let node = self.ctx.registry().transaction(|state| {
            parent_still_active(state, parent.id)?;
            state.insert_ca(node.clone())?;
            Ok(node)
        })?;

        info!(id = %node.id, parent = %parent.id, "registered external RA");
        self.ctx.audit(
            &AuditEvent::success(&caller.username, AuditAction::ExternalRaCreated, target(node.id))
                .with_detail("parent", parent.id),
        );
        Ok(node)
    }

    /// Revokes a CA, every CA below it, and every active certificate they issued.
    ///
    /// The cascade commits as one transaction. Nodes already revoked are
    /// skipped, so a retry after a failure is safe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown CA, or
    /// [`Error::CascadeFailure`] if the cascade could not be committed, in
    /// which case nothing was changed.
    pub fn revoke(&self, caller: &Caller, ca_id: CaId, reason: &str) -> Result<RevocationSummary> {
        let ca = self.ctx.ca(ca_id)?;
        self.ctx.require(caller, Permission::RevokeCa, Some(&ca))?;
        let reason = sanitize_reason(reason)?;
        let cert_reason = format!("Parent CA revoked: {reason}");
        let now = Utc::now();

        let summary = self
            .ctx
            .registry()
            .transaction(|state| {
                let mut summary = RevocationSummary {
                    id: ca_id,
                    status: CaStatus::Revoked,
                    revoked_cas: Vec::new(),
                    revoked_certificates: Vec::new(),
                };
                for id in subtree(state, ca_id) {
                    let node = state.ca_mut(id).ok_or_else(|| {
                        Error::CascadeFailure(format!("CA {id} disappeared during revocation"))
                    })?;
                    if node.status != CaStatus::Revoked {
                        node.status = CaStatus::Revoked;
                        node.revoked_at = Some(now);
                        node.revocation_reason = Some(reason.clone());
                        summary.revoked_cas.push(id);
                    }

                    let active: Vec<_> = state
                        .certificates_of(id)
                        .filter(|c| c.status == CertificateStatus::Active)
                        .map(|c| c.id)
                        .collect();
                    for cert_id in active {
                        let cert = state.certificate_mut(cert_id).ok_or_else(|| {
                            Error::CascadeFailure(format!(
                                "certificate {cert_id} disappeared during revocation"
                            ))
                        })?;
                        cert.status = CertificateStatus::Revoked;
                        cert.revoked_at = Some(now);
                        cert.revocation_reason = Some(cert_reason.clone());
                        summary.revoked_certificates.push(cert_id);
                    }
                }
                Ok(summary)
            })
            .map_err(|e| match e {
                Error::CascadeFailure(_) => e,
                other => Error::CascadeFailure(other.to_string()),
            })?;

        info!(
            id = %ca_id,
            cas = summary.revoked_cas.len(),
            certificates = summary.revoked_certificates.len(),
            "revoked CA subtree"
        );
        self.ctx.audit(
            &AuditEvent::success(&caller.username, AuditAction::CaRevoked, target(ca_id))
                .with_detail("reason", &reason)
                .with_detail("revoked_cas", summary.revoked_cas.len())
                .with_detail("revoked_certificates", summary.revoked_certificates.len()),
        );
        Ok(summary)
    }

    /// Certificates from `ca_id` up to its root, leaf first.
    ///
    /// Unknown ids give an empty chain.
    #[must_use]
    pub fn chain_of(&self, ca_id: CaId) -> Vec<String> {
        self.ctx.registry().read(|state| {
            let mut chain = Vec::new();
            let mut seen = HashSet::new();
            let mut next = Some(ca_id);
            while let Some(id) = next {
                if !seen.insert(id) {
                    warn!(%id, "cycle in CA parent links");
                    break;
                }
                let Some(ca) = state.ca(id) else { break };
                chain.push(ca.certificate_pem.clone());
                next = ca.parent_ca;
            }
            chain
        })
    }

    /// Direct children of a CA.
    #[must_use]
    pub fn subordinates_of(&self, ca_id: CaId) -> Vec<CertificateAuthority> {
        self.ctx.registry().read(|state| {
            state
                .children_of(ca_id)
                .iter()
                .filter_map(|id| state.ca(*id).cloned())
                .collect()
        })
    }

    /// All CAs at one depth.
    #[must_use]
    pub fn by_level(&self, level: u32) -> Vec<CertificateAuthority> {
        self.ctx.registry().read(|state| {
            state
                .cas()
                .filter(|ca| ca.hierarchy_level == level)
                .cloned()
                .collect()
        })
    }

    /// Every CA.
    #[must_use]
    pub fn all(&self) -> Vec<CertificateAuthority> {
        self.ctx.registry().read(|state| state.cas().cloned().collect())
    }

    /// One CA.
    #[must_use]
    pub fn get(&self, ca_id: CaId) -> Option<CertificateAuthority> {
        self.ctx.registry().read(|state| state.ca(ca_id).cloned())
    }

    /// Requests still awaiting a decision.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<CaPendingRequest> {
        self.ctx.registry().read(|state| {
            state
                .pending_requests()
                .filter(|r| r.status == PendingStatus::Pending)
                .cloned()
                .collect()
        })
    }

    /// One request, decided or not.
    #[must_use]
    pub fn get_pending(&self, id: PendingRequestId) -> Option<CaPendingRequest> {
        self.ctx.registry().read(|state| state.pending(id).cloned())
    }

    /// Marks active CAs whose validity ended before `now` as expired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the change cannot be persisted.
    pub fn mark_expired(&self, now: DateTime<Utc>) -> Result<Vec<CaId>> {
        let expired = self.ctx.registry().transaction(|state| {
            let ids: Vec<CaId> = state
                .cas()
                .filter(|ca| ca.is_active() && ca.valid_until < now)
                .map(|ca| ca.id)
                .collect();
            for id in &ids {
                if let Some(ca) = state.ca_mut(*id) {
                    ca.status = CaStatus::Expired;
                }
            }
            Ok(ids)
        })?;

        for id in &expired {
            self.ctx.audit(&AuditEvent::success("system", AuditAction::CaExpired, target(*id)));
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "marked CAs expired");
        }
        Ok(expired)
    }
}
