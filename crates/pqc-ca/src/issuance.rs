//! Certificate issuance engine.
//!
//! Issues service and citizen certificates, holds citizen requests for
//! approval, revokes certificates and publishes revocation lists.

use chrono::{Duration, Utc};
use pqc_audit::{AuditAction, AuditEvent};
use pqc_crypto::{Certificate, CertificateBuilder, CrlBuilder, KeyUsage, PublicKey, SecurityLevel};
use tracing::{debug, info};

use crate::api::{CertificateStats, IssueUserCertificateRequest, ServiceCertificate};
use crate::authority::{Caller, Permission};
use crate::context::PkiContext;
use crate::error::{Error, Result};
use crate::registry::RegistryState;
use crate::sanitize::{
    sanitize_dn_component, sanitize_dns_name, sanitize_reason, sanitize_subject_dn,
};
use crate::types::{
    CaId, CaKind, CaStatus, CertificateAuthority, CertificateId, CertificateStatus,
    IssuedCertificate,
};

/// Longest term accepted for a service certificate.
pub const MAX_SERVICE_DAYS: i64 = 3650;

/// Organisation of citizen subject names.
const CITIZEN_ORGANIZATION: &str = "Citizen";

/// Engine issuing and revoking end-entity certificates.
#[derive(Debug, Clone)]
pub struct CertificateIssuance {
    ctx: PkiContext,
}

fn target(id: CertificateId) -> String {
    format!("certificate:{id}")
}

fn require_active_issuer(issuer: &CertificateAuthority) -> Result<()> {
    if !issuer.is_active() {
        return Err(Error::Validation("issuer not active".into()));
    }
    if issuer.private_key_handle.is_none() {
        return Err(Error::Validation(format!(
            "{} '{}' holds no signing key",
            issuer.kind, issuer.name
        )));
    }
    Ok(())
}

fn issuer_still_active(state: &RegistryState, issuer: CaId) -> Result<()> {
    match state.ca(issuer) {
        Some(ca) if ca.is_active() => Ok(()),
        _ => Err(Error::StateConflict("issuer is no longer active".into())),
    }
}

impl CertificateIssuance {
    /// Creates the engine.
    #[must_use]
    pub const fn new(ctx: PkiContext) -> Self {
        Self { ctx }
    }

    fn record(&self, id: CertificateId) -> Result<IssuedCertificate> {
        self.ctx
            .registry()
            .read(|state| state.certificate(id).cloned())
            .ok_or_else(|| Error::NotFound(format!("certificate {id}")))
    }

    /// Signs a non-CA citizen certificate under `issuer`.
    fn sign_leaf(
        &self,
        issuer: &CertificateAuthority,
        subject: &str,
        public_key: PublicKey,
    ) -> Result<Certificate> {
        let issuer_cert = PkiContext::ca_certificate(issuer)?;
        let issuer_key = self.ctx.load_ca_key(issuer)?;
        let cert = CertificateBuilder::new(subject, public_key)
            .validity_days(self.ctx.config().validity.user_days)
            .key_usage(KeyUsage::NonRepudiation)
            .signed_by(self.ctx.provider(), &issuer_cert, &issuer_key)?;
        Ok(cert)
    }

    /// Issues a TLS certificate for an internal service and returns its key.
    ///
    /// The issuer is the active internal CA, or the active root when there is
    /// none. The private key is handed back and not retained. When
    /// `dns_names` is empty the certificate names `<service>.internal`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for bad names or term, or
    /// [`Error::NotFound`] if no CA can issue.
    pub fn issue_service_certificate(
        &self,
        service_name: &str,
        dns_names: &[String],
        valid_days: Option<i64>,
    ) -> Result<ServiceCertificate> {
        let config = self.ctx.config();
        let service = sanitize_dns_name(service_name)?;
        let valid_days = valid_days.unwrap_or(config.validity.service_days);
        if !(1..=MAX_SERVICE_DAYS).contains(&valid_days) {
            return Err(Error::Validation(format!(
                "valid_days must be between 1 and {MAX_SERVICE_DAYS}"
            )));
        }
        let common_name = format!("{service}.internal");
        let mut names = dns_names
            .iter()
            .map(|n| sanitize_dns_name(n))
            .collect::<Result<Vec<_>>>()?;
        if names.is_empty() {
            names.push(common_name.clone());
        }

        let issuer = self
            .ctx
            .registry()
            .read(|state| {
                let usable = |ca: &&CertificateAuthority| {
                    ca.is_active() && ca.private_key_handle.is_some()
                };
                state
                    .cas()
                    .filter(usable)
                    .find(|ca| ca.label == config.internal_ca_label)
                    .or_else(|| state.cas().filter(usable).find(|ca| ca.is_root()))
                    .cloned()
            })
            .ok_or_else(|| Error::NotFound("no active CA can issue service certificates".into()))?;

        let provider = self.ctx.provider();
        let pair = provider.generate_key_pair(config.service_level)?;
        let issuer_cert = PkiContext::ca_certificate(&issuer)?;
        let issuer_key = self.ctx.load_ca_key(&issuer)?;
        let mut builder =
            CertificateBuilder::new(config.subject_dn(&common_name), pair.public_key().clone())
                .validity_days(valid_days)
                .key_usage(KeyUsage::ServerAuth)
                .key_usage(KeyUsage::ClientAuth);
        for name in &names {
            builder = builder.dns(name.as_str());
        }
        let cert = builder.signed_by(provider, &issuer_cert, &issuer_key)?;
        drop(issuer_key);

        let record = IssuedCertificate {
            id: CertificateId::new(),
            issuing_ca: issuer.id,
            subject_dn: cert.subject().to_string(),
            serial_number: Some(cert.serial().to_string()),
            certificate_pem: Some(cert.to_pem()),
            public_key_pem: cert.public_key().to_pem(),
            csr_pem: None,
            valid_from: Some(cert.not_before()),
            valid_until: Some(cert.not_after()),
            status: CertificateStatus::Active,
            revoked_at: None,
            revocation_reason: None,
            requested_by: Some(service.clone()),
            rejection_reason: None,
            created_at: Utc::now(),
        };
        let id = record.id;
        self.ctx.registry().transaction(|state| {
            issuer_still_active(state, issuer.id)?;
            state.insert_certificate(record)
        })?;

        info!(%id, service = %service, issuer = %issuer.id, "issued service certificate");
        self.ctx.audit(
            &AuditEvent::success("system", AuditAction::ServiceCertificateIssued, target(id))
                .with_detail("service", &service)
                .with_detail("issuer", issuer.id),
        );
        Ok(ServiceCertificate {
            certificate_pem: cert.to_pem(),
            private_key_pem: pair.private_key().to_pem(),
            issuer_certificate_pem: issuer.certificate_pem,
        })
    }

    /// Signs a citizen CSR immediately.
    ///
    /// The subject comes from the request's override when given, else from
    /// the CSR.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown issuer and
    /// [`Error::Validation`] if the issuer is not active, holds no key, or the
    /// CSR or subject is invalid.
    pub fn issue_user_certificate(
        &self,
        caller: &Caller,
        request: &IssueUserCertificateRequest,
    ) -> Result<IssuedCertificate> {
        let issuer = self.ctx.ca(request.issuer_id)?;
        self.ctx.require(caller, Permission::IssueUserCert, Some(&issuer))?;
        require_active_issuer(&issuer)?;
        let csr = self.ctx.parse_csr(&request.csr)?;
        let subject = match request.subject_dn.as_deref() {
            Some(dn) => sanitize_subject_dn(dn)?,
            None => sanitize_subject_dn(csr.subject())?,
        };

        let cert = self.sign_leaf(&issuer, &subject, csr.public_key().clone())?;
        let record = IssuedCertificate {
            id: CertificateId::new(),
            issuing_ca: issuer.id,
            subject_dn: subject,
            serial_number: Some(cert.serial().to_string()),
            certificate_pem: Some(cert.to_pem()),
            public_key_pem: cert.public_key().to_pem(),
            csr_pem: None,
            valid_from: Some(cert.not_before()),
            valid_until: Some(cert.not_after()),
            status: CertificateStatus::Active,
            revoked_at: None,
            revocation_reason: None,
            requested_by: Some(caller.username.clone()),
            rejection_reason: None,
            created_at: Utc::now(),
        };
        let record = self.ctx.registry().transaction(|state| {
            issuer_still_active(state, issuer.id)?;
            state.insert_certificate(record.clone())?;
            Ok(record)
        })?;

        info!(id = %record.id, issuer = %issuer.id, "issued user certificate");
        self.ctx.audit(
            &AuditEvent::success(
                &caller.username,
                AuditAction::UserCertificateIssued,
                target(record.id),
            )
            .with_detail("issuer", issuer.id)
            .with_detail("serial", record.serial_number.as_deref().unwrap_or_default()),
        );
        Ok(record)
    }

    /// Holds a citizen CSR for later approval.
    ///
    /// The subject is always `CN=<username>,O=Citizen,C=<country>`; the CSR
    /// subject is ignored. The issuer of record is the active issuing CA or
    /// RA with the lowest level, ties broken by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a bad username, algorithm or CSR, or
    /// [`Error::NotFound`] if no authority is active.
    pub fn create_pending_request(
        &self,
        username: &str,
        algorithm: &str,
        csr_pem: &str,
    ) -> Result<IssuedCertificate> {
        let username = sanitize_dn_component(username, "username")?;
        let level: SecurityLevel = algorithm.parse()?;
        let csr = self.ctx.parse_csr(csr_pem)?;
        if csr.public_key().level() != level {
            return Err(Error::Validation(format!(
                "CSR key is {} but {level} was requested",
                csr.public_key().level()
            )));
        }

        let subject = self.ctx.config().subject_dn_in(&username, CITIZEN_ORGANIZATION);
        let record = self.ctx.registry().transaction(|state| {
            let issuer = state
                .cas()
                .filter(|ca| {
                    ca.is_active()
                        && ca.private_key_handle.is_some()
                        && matches!(ca.kind, CaKind::IssuingCa | CaKind::RegistrationAuthority)
                })
                .min_by(|a, b| (a.hierarchy_level, &a.name).cmp(&(b.hierarchy_level, &b.name)))
                .ok_or_else(|| Error::NotFound("no active issuing authority".into()))?;
            let record = IssuedCertificate {
                id: CertificateId::new(),
                issuing_ca: issuer.id,
                subject_dn: subject,
                serial_number: None,
                certificate_pem: None,
                public_key_pem: csr.public_key().to_pem(),
                csr_pem: Some(csr.to_pem()),
                valid_from: None,
                valid_until: None,
                status: CertificateStatus::Pending,
                revoked_at: None,
                revocation_reason: None,
                requested_by: Some(username.clone()),
                rejection_reason: None,
                created_at: Utc::now(),
            };
            state.insert_certificate(record.clone())?;
            Ok(record)
        })?;

        info!(id = %record.id, issuer = %record.issuing_ca, "recorded certificate request");
        self.ctx.audit(
            &AuditEvent::success(&username, AuditAction::CertificateRequested, target(record.id))
                .with_detail("algorithm", level),
        );
        Ok(record)
    }

    /// Signs a held request and activates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] if the request is not pending or holds
    /// no CSR, and [`Error::Validation`] if its issuer is no longer active.
    pub fn approve(&self, caller: &Caller, request_id: CertificateId) -> Result<IssuedCertificate> {
        let pending = self.record(request_id)?;
        let issuer = self.ctx.ca(pending.issuing_ca)?;
        self.ctx.require(caller, Permission::ApproveRequest, Some(&issuer))?;
        if pending.status != CertificateStatus::Pending {
            return Err(Error::StateConflict("certificate is not pending".into()));
        }
        let csr_pem = pending
            .csr_pem
            .as_deref()
            .ok_or_else(|| Error::StateConflict("no CSR held for request".into()))?;
        require_active_issuer(&issuer)?;
        let csr = self.ctx.parse_csr(csr_pem)?;

        let cert = self.sign_leaf(&issuer, &pending.subject_dn, csr.public_key().clone())?;
        let record = self.ctx.registry().transaction(|state| {
            issuer_still_active(state, issuer.id)?;
            let current = state
                .certificate(request_id)
                .ok_or_else(|| Error::NotFound(format!("certificate {request_id}")))?;
            if current.status != CertificateStatus::Pending {
                return Err(Error::StateConflict("certificate is not pending".into()));
            }
            state.claim_serial(cert.serial(), request_id)?;
            let record = state
                .certificate_mut(request_id)
                .ok_or_else(|| Error::NotFound(format!("certificate {request_id}")))?;
            record.serial_number = Some(cert.serial().to_string());
            record.certificate_pem = Some(cert.to_pem());
            record.public_key_pem = cert.public_key().to_pem();
            record.valid_from = Some(cert.not_before());
            record.valid_until = Some(cert.not_after());
            record.status = CertificateStatus::Active;
            record.csr_pem = None;
            Ok(record.clone())
        })?;

        info!(id = %request_id, issuer = %issuer.id, "approved certificate request");
        self.ctx.audit(
            &AuditEvent::success(
                &caller.username,
                AuditAction::CertificateApproved,
                target(request_id),
            )
            .with_detail("serial", cert.serial()),
        );
        Ok(record)
    }

    /// Rejects a held request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] if the request is not pending.
    pub fn reject(
        &self,
        caller: &Caller,
        request_id: CertificateId,
        reason: &str,
    ) -> Result<IssuedCertificate> {
        let pending = self.record(request_id)?;
        let issuer = self.ctx.ca(pending.issuing_ca)?;
        self.ctx.require(caller, Permission::ApproveRequest, Some(&issuer))?;
        let reason = sanitize_reason(reason)?;

        let record = self.ctx.registry().transaction(|state| {
            let record = state
                .certificate_mut(request_id)
                .ok_or_else(|| Error::NotFound(format!("certificate {request_id}")))?;
            if record.status != CertificateStatus::Pending {
                return Err(Error::StateConflict("certificate is not pending".into()));
            }
            record.status = CertificateStatus::Rejected;
            record.rejection_reason = Some(reason.clone());
            Ok(record.clone())
        })?;

        info!(id = %request_id, "rejected certificate request");
        self.ctx.audit(
            &AuditEvent::success(
                &caller.username,
                AuditAction::CertificateRejected,
                target(request_id),
            )
            .with_detail("reason", &reason),
        );
        Ok(record)
    }

    /// Revokes an active certificate.
    ///
    /// Revoking an already revoked certificate returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] for pending, rejected or expired
    /// certificates.
    pub fn revoke(
        &self,
        caller: &Caller,
        cert_id: CertificateId,
        reason: &str,
    ) -> Result<IssuedCertificate> {
        let current = self.record(cert_id)?;
        let issuer = self.ctx.ca(current.issuing_ca)?;
        self.ctx.require(caller, Permission::RevokeCertificate, Some(&issuer))?;
        let reason = sanitize_reason(reason)?;
        let now = Utc::now();

        let (record, changed) = self.ctx.registry().transaction(|state| {
            let record = state
                .certificate_mut(cert_id)
                .ok_or_else(|| Error::NotFound(format!("certificate {cert_id}")))?;
            match record.status {
                CertificateStatus::Active => {
                    record.status = CertificateStatus::Revoked;
                    record.revoked_at = Some(now);
                    record.revocation_reason = Some(reason.clone());
                    Ok((record.clone(), true))
                }
                CertificateStatus::Revoked => Ok((record.clone(), false)),
                _ => Err(Error::StateConflict(
                    "only active certificates can be revoked".into(),
                )),
            }
        })?;

        if changed {
            info!(id = %cert_id, "revoked certificate");
            self.ctx.audit(
                &AuditEvent::success(
                    &caller.username,
                    AuditAction::CertificateRevoked,
                    target(cert_id),
                )
                .with_detail("reason", &reason),
            );
        } else {
            debug!(id = %cert_id, "certificate already revoked");
        }
        Ok(record)
    }

    /// Builds and signs the revocation list of one CA, as PEM.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the CA is expired or holds no key.
    pub fn generate_crl(&self, ca_id: CaId) -> Result<String> {
        let ca = self.ctx.ca(ca_id)?;
        if !matches!(ca.status, CaStatus::Active | CaStatus::Revoked) {
            return Err(Error::Validation(
                "cannot generate CRL for inactive/expired CA".into(),
            ));
        }
        let key = self.ctx.load_ca_key(&ca)?;

        let now = Utc::now();
        let mut builder = CrlBuilder::new(&ca.subject_dn)
            .next_update_in(Duration::days(self.ctx.config().crl_next_update_days))
            .crl_number(now.timestamp());
        let entries = self.ctx.registry().read(|state| {
            state
                .certificates_of(ca_id)
                .filter(|c| c.status == CertificateStatus::Revoked)
                .filter_map(|c| {
                    c.serial_number
                        .clone()
                        .map(|serial| {
                            (serial, c.revoked_at.unwrap_or(now), c.revocation_reason.clone())
                        })
                })
                .collect::<Vec<_>>()
        });
        let count = entries.len();
        for (serial, at, reason) in entries {
            builder = builder.revoked(serial, at, reason);
        }
        let crl = builder.sign(self.ctx.provider(), &key)?;

        info!(ca = %ca_id, entries = count, "generated CRL");
        self.ctx.audit(
            &AuditEvent::success("system", AuditAction::CrlGenerated, format!("ca:{ca_id}"))
                .with_detail("entries", count),
        );
        Ok(crl.to_pem())
    }

    /// Counts of all certificate records.
    #[must_use]
    pub fn stats(&self) -> CertificateStats {
        self.ctx.registry().read(|state| {
            state.certificates().fold(CertificateStats::default(), |mut stats, c| {
                stats.total += 1;
                match c.status {
                    CertificateStatus::Active => stats.active += 1,
                    CertificateStatus::Revoked => stats.revoked += 1,
                    CertificateStatus::Pending => stats.pending += 1,
                    CertificateStatus::Expired | CertificateStatus::Rejected => {}
                }
                stats
            })
        })
    }

    /// One certificate record.
    #[must_use]
    pub fn get(&self, id: CertificateId) -> Option<IssuedCertificate> {
        self.ctx.registry().read(|state| state.certificate(id).cloned())
    }

    /// Every record whose issuer of record is `ca_id`.
    #[must_use]
    pub fn certificates_of(&self, ca_id: CaId) -> Vec<IssuedCertificate> {
        self.ctx
            .registry()
            .read(|state| state.certificates_of(ca_id).cloned().collect())
    }

    /// Looks a certificate up by serial number.
    #[must_use]
    pub fn find_by_serial(&self, serial: &str) -> Option<IssuedCertificate> {
        self.ctx
            .registry()
            .read(|state| state.find_by_serial(serial).cloned())
    }
}
