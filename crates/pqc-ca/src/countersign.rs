//! Countersignature ("stamp") engine.
//!
//! An officer stamp binds the officer CA's signature to a citizen's signature
//! over a document hash. Both sides sign the same byte contract:
//!
//! ```text
//! payload = SHA-256(document_hash ":" user_signature)
//! ```
//!
//! where both fields are the base64 strings exactly as submitted.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use pqc_audit::{AuditAction, AuditEvent};
use pqc_crypto::{Certificate, is_expired, sha256};
use tracing::{debug, info, warn};

use crate::api::{StampRequest, StampVerification};
use crate::context::PkiContext;
use crate::error::{Error, Result};
use crate::sanitize::{decode_base64, sanitize_dn_component};
use crate::tsa::{TimestampAuthority, TstInfo};
use crate::types::{CaId, Countersignature, StampId, StampStatus};

/// The digest an officer signs for a citizen signature.
#[must_use]
pub fn stamp_payload(document_hash: &str, user_signature: &str) -> [u8; 32] {
    sha256(format!("{document_hash}:{user_signature}").as_bytes())
}

/// Engine applying, verifying and revoking stamps.
#[derive(Clone)]
pub struct Countersigning {
    ctx: PkiContext,
    tsa: Option<Arc<dyn TimestampAuthority>>,
}

impl std::fmt::Debug for Countersigning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Countersigning")
            .field("timestamping", &self.tsa.is_some())
            .finish_non_exhaustive()
    }
}

fn target(id: StampId) -> String {
    format!("stamp:{id}")
}

impl Countersigning {
    /// Creates the engine; stamps carry no timestamp without an authority.
    #[must_use]
    pub const fn new(ctx: PkiContext, tsa: Option<Arc<dyn TimestampAuthority>>) -> Self {
        Self { ctx, tsa }
    }

    /// Countersigns a citizen signature with the officer CA's key.
    ///
    /// A failing timestamp authority does not fail the stamp; it is stored
    /// without a token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] if an active stamp already covers the
    /// same document and signature, [`Error::NotFound`] for an unknown officer
    /// CA, or [`Error::Validation`] for malformed input, an inactive officer
    /// CA, or a citizen signature that does not verify.
    pub fn apply_stamp(&self, request: &StampRequest) -> Result<Countersignature> {
        let already = self.ctx.registry().read(|state| {
            state
                .active_stamp_for(&request.document_hash, &request.user_signature)
                .is_some()
        });
        if already {
            return Err(Error::StateConflict("document already stamped".into()));
        }

        let hash = decode_base64(&request.document_hash, "document_hash")?;
        let user_signature = decode_base64(&request.user_signature, "user_signature")?;
        let officer_id = sanitize_dn_component(&request.officer_id, "officer_id")?;

        let officer_ca = self.ctx.ca(request.officer_ca_id)?;
        if !officer_ca.is_active() {
            return Err(Error::Validation(format!(
                "officer CA '{}' is not active",
                officer_ca.name
            )));
        }

        let user_cert = Certificate::from_pem(&request.user_cert_pem)
            .map_err(|_| Error::Validation("user certificate is not a valid certificate".into()))?;
        let provider = self.ctx.provider();
        if !provider.verify(user_cert.public_key(), &hash, &user_signature) {
            debug!(subject = %user_cert.subject(), "citizen signature rejected");
            return Err(Error::Validation("user signature verification failed".into()));
        }

        let payload = stamp_payload(&request.document_hash, &request.user_signature);
        let officer_key = self.ctx.load_ca_key(&officer_ca)?;
        let officer_signature = provider.sign(&officer_key, &payload)?;
        drop(officer_key);

        let timestamp_token = self.tsa.as_ref().and_then(|tsa| match tsa.issue_token(&payload) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "timestamp authority unavailable, stamping without token");
                None
            }
        });

        let stamp = Countersignature {
            id: StampId::new(),
            document_hash: request.document_hash.clone(),
            user_signature: request.user_signature.clone(),
            user_cert_pem: request.user_cert_pem.clone(),
            officer_signature: STANDARD.encode(officer_signature),
            officer_cert_pem: officer_ca.certificate_pem.clone(),
            officer_id,
            officer_ca: officer_ca.id,
            timestamp_token,
            stamped_at: Utc::now(),
            purpose: request.purpose,
            status: StampStatus::Active,
            revoked_at: None,
            revoked_by: None,
        };
        let stamp = self.ctx.registry().transaction(|state| {
            if !state.ca(officer_ca.id).is_some_and(|ca| ca.is_active()) {
                return Err(Error::StateConflict("officer CA is no longer active".into()));
            }
            state.insert_stamp(stamp.clone())?;
            Ok(stamp)
        })?;

        info!(
            id = %stamp.id,
            officer = %stamp.officer_id,
            ca = %officer_ca.id,
            purpose = %stamp.purpose.as_str(),
            timestamped = stamp.timestamp_token.is_some(),
            "applied stamp"
        );
        self.ctx.audit(
            &AuditEvent::success(&stamp.officer_id, AuditAction::StampApplied, target(stamp.id))
                .with_detail("ca", officer_ca.id)
                .with_detail("purpose", stamp.purpose.as_str()),
        );
        Ok(stamp)
    }

    /// Checks an officer signature against a document and citizen signature.
    ///
    /// Never fails; every problem is reported in the verdict. A signature
    /// that verifies under an expired officer certificate is not valid.
    #[must_use]
    pub fn verify_stamp(
        &self,
        document_hash: &str,
        user_signature: &str,
        officer_signature: &str,
        officer_cert_pem: &str,
    ) -> StampVerification {
        let cert = match Certificate::from_pem(officer_cert_pem) {
            Ok(cert) => cert,
            Err(e) => {
                debug!(error = %e, "officer certificate unreadable");
                return StampVerification::new(false, "verification error");
            }
        };
        let Ok(signature) = STANDARD.decode(officer_signature.trim()) else {
            return StampVerification::new(false, "verification error");
        };

        let payload = stamp_payload(document_hash, user_signature);
        let key = cert.public_key();
        let verdict = if !self.ctx.provider().verify(key, &payload, &signature) {
            StampVerification::new(false, "invalid officer signature")
        } else if is_expired(&cert) {
            StampVerification::new(false, "officer certificate expired")
        } else {
            StampVerification::new(true, "stamp verified successfully")
        };
        let verdict = verdict
            .with_detail("officerSubject", cert.subject())
            .with_detail("securityLevel", key.level())
            .with_detail("validFrom", cert.not_before().to_rfc3339())
            .with_detail("validUntil", cert.not_after().to_rfc3339());
        self.with_timestamp(verdict, document_hash, user_signature, &payload)
    }

    /// Adds the timestamp verdict of a stored stamp over the same signature.
    fn with_timestamp(
        &self,
        verdict: StampVerification,
        document_hash: &str,
        user_signature: &str,
        payload: &[u8],
    ) -> StampVerification {
        let Some(tsa) = &self.tsa else {
            return verdict;
        };
        let token = self.ctx.registry().read(|state| {
            state
                .active_stamp_for(document_hash, user_signature)
                .and_then(|stamp| stamp.timestamp_token.clone())
        });
        let Some(token) = token else {
            return verdict;
        };
        match tsa.verify_token(&token, payload) {
            Ok(true) => {
                let verdict = verdict.with_detail("timestamp", "valid");
                match TstInfo::from_token(&token) {
                    Ok(info) => verdict.with_detail("timestampTime", info.gen_time.to_rfc3339()),
                    Err(_) => verdict,
                }
            }
            Ok(false) => verdict.with_detail("timestamp", "invalid"),
            Err(e) => {
                debug!(error = %e, "stored timestamp token unreadable");
                verdict.with_detail("timestamp", "error")
            }
        }
    }

    /// Revokes a stamp, freeing the document and signature for a new stamp.
    ///
    /// Revoking a stamp that is no longer active returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the stamp does not exist.
    pub fn revoke_stamp(&self, stamp_id: StampId, revoked_by: &str) -> Result<Countersignature> {
        let revoked_by = sanitize_dn_component(revoked_by, "revoked_by")?;
        let now = Utc::now();
        let (stamp, changed) = self.ctx.registry().transaction(|state| {
            let changed = state.retire_stamp(stamp_id, StampStatus::Revoked, now, &revoked_by)?;
            let stamp = state
                .stamp(stamp_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("stamp {stamp_id}")))?;
            Ok((stamp, changed))
        })?;

        if changed {
            info!(id = %stamp_id, by = %revoked_by, "revoked stamp");
            self.ctx.audit(&AuditEvent::success(
                &revoked_by,
                AuditAction::StampRevoked,
                target(stamp_id),
            ));
        } else {
            debug!(id = %stamp_id, status = ?stamp.status, "stamp not active, nothing to revoke");
        }
        Ok(stamp)
    }

    /// One stamp.
    #[must_use]
    pub fn get(&self, id: StampId) -> Option<Countersignature> {
        self.ctx.registry().read(|state| state.stamp(id).cloned())
    }

    /// Every stamp over a document, oldest first.
    #[must_use]
    pub fn stamps_for_document(&self, document_hash: &str) -> Vec<Countersignature> {
        let mut stamps: Vec<_> = self.ctx.registry().read(|state| {
            state
                .stamps()
                .filter(|s| s.document_hash == document_hash)
                .cloned()
                .collect()
        });
        stamps.sort_by_key(|s| s.stamped_at);
        stamps
    }

    /// Stamps produced with one officer CA.
    #[must_use]
    pub fn stamps_by_ca(&self, ca_id: CaId) -> Vec<Countersignature> {
        self.ctx.registry().read(|state| {
            state
                .stamps()
                .filter(|s| s.officer_ca == ca_id)
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{IssueUserCertificateRequest, StampReceipt};
    use crate::authority::Caller;
    use crate::context::test_support::context;
    use crate::hierarchy::CaHierarchy;
    use crate::issuance::CertificateIssuance;
    use crate::tsa::LocalTsa;
    use crate::types::{CertificateAuthority, StampPurpose};
    use chrono::Duration;
    use pqc_audit::MemoryAuditLogger;
    use pqc_crypto::{
        CertificateBuilder, CertificationRequest, CryptoProvider, KeyPair, MlDsaProvider,
        SecurityLevel,
    };

    struct Citizen {
        pair: KeyPair,
        cert_pem: String,
    }

    impl Citizen {
        fn sign(&self, hash_b64: &str) -> String {
            let hash = STANDARD.decode(hash_b64).unwrap();
            let sig = MlDsaProvider::new().sign(self.pair.private_key(), &hash).unwrap();
            STANDARD.encode(sig)
        }
    }

    struct Fixture {
        engine: Countersigning,
        hierarchy: CaHierarchy,
        audit: Arc<MemoryAuditLogger>,
        officer_ca: CertificateAuthority,
        citizen: Citizen,
    }

    fn fixture_with(tsa: Option<Arc<dyn TimestampAuthority>>) -> Fixture {
        let (ctx, audit) = context();
        let admin = Caller::national_admin("admin");
        let hierarchy = CaHierarchy::new(ctx.clone());
        let root = hierarchy.init_root_ca(&admin, "Root").unwrap();
        let officer_ca = hierarchy
            .create_subordinate(
                &admin,
                root.id,
                "Hanoi",
                crate::types::CaKind::IssuingCa,
                "ML-DSA-65",
                None,
                None,
            )
            .unwrap();

        let provider = MlDsaProvider::new();
        let pair = provider.generate_key_pair(SecurityLevel::MlDsa44).unwrap();
        let csr = CertificationRequest::build(&provider, "CN=Nguyen Van A,O=Citizen,C=VN", &pair)
            .unwrap();
        let issued = CertificateIssuance::new(ctx.clone())
            .issue_user_certificate(
                &admin,
                &IssueUserCertificateRequest {
                    issuer_id: officer_ca.id,
                    csr: csr.to_pem(),
                    subject_dn: None,
                },
            )
            .unwrap();

        Fixture {
            engine: Countersigning::new(ctx, tsa),
            hierarchy,
            audit,
            officer_ca,
            citizen: Citizen {
                pair,
                cert_pem: issued.certificate_pem.unwrap(),
            },
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    fn request(f: &Fixture, document_hash: &str) -> StampRequest {
        StampRequest {
            document_hash: document_hash.into(),
            user_signature: f.citizen.sign(document_hash),
            user_cert_pem: f.citizen.cert_pem.clone(),
            officer_id: "officer01".into(),
            officer_ca_id: f.officer_ca.id,
            purpose: StampPurpose::default(),
        }
    }

    struct DownTsa;

    impl TimestampAuthority for DownTsa {
        fn issue_token(&self, _data: &[u8]) -> Result<String> {
            Err(Error::Crypto("connection refused".into()))
        }

        fn verify_token(&self, _token: &str, _data: &[u8]) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn applied_stamp_verifies() {
        let f = fixture();
        let stamp = f.engine.apply_stamp(&request(&f, "YWJj")).unwrap();
        assert_eq!(stamp.status, StampStatus::Active);
        assert_eq!(stamp.officer_cert_pem, f.officer_ca.certificate_pem);
        assert!(stamp.timestamp_token.is_none());

        let receipt = StampReceipt::from(&stamp);
        let verdict = f.engine.verify_stamp(
            &stamp.document_hash,
            &stamp.user_signature,
            &receipt.stamp_signature,
            &receipt.officer_cert_pem,
        );
        assert!(verdict.valid, "{verdict:?}");
        assert_eq!(verdict.message, "stamp verified successfully");
        assert_eq!(verdict.details["securityLevel"], "ML-DSA-65");
        assert!(verdict.details["officerSubject"].starts_with("CN=Hanoi CA"));
        assert_eq!(f.audit.events_for(AuditAction::StampApplied).len(), 1);
    }

    #[test]
    fn verification_uses_the_officer_key_level() {
        let mut f = fixture();
        let root = f.officer_ca.parent_ca.unwrap();
        f.officer_ca = f
            .hierarchy
            .create_subordinate(
                &Caller::national_admin("admin"),
                root,
                "Hue",
                crate::types::CaKind::IssuingCa,
                "ML-DSA-87",
                None,
                None,
            )
            .unwrap();

        let stamp = f.engine.apply_stamp(&request(&f, "ZGVm")).unwrap();
        let verdict = f.engine.verify_stamp(
            &stamp.document_hash,
            &stamp.user_signature,
            &stamp.officer_signature,
            &stamp.officer_cert_pem,
        );
        assert!(verdict.valid, "{verdict:?}");
        assert_eq!(verdict.details["securityLevel"], "ML-DSA-87");
    }

    #[test]
    fn second_stamp_on_same_signature_conflicts() {
        let f = fixture();
        let req = request(&f, "YWJj");
        let first = f.engine.apply_stamp(&req).unwrap();
        let err = f.engine.apply_stamp(&req).unwrap_err();
        assert!(matches!(err, Error::StateConflict(ref m) if m == "document already stamped"));

        f.engine.revoke_stamp(first.id, "supervisor").unwrap();
        let again = f.engine.apply_stamp(&req).unwrap();
        assert_ne!(again.id, first.id);
        assert_eq!(f.engine.stamps_for_document("YWJj").len(), 2);
    }

    #[test]
    fn concurrent_stamps_admit_one() {
        let f = fixture();
        let req = request(&f, "ZG9jdW1lbnQ=");
        let successes = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| f.engine.apply_stamp(&req).is_ok()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(successes, 1);
        assert_eq!(f.engine.stamps_by_ca(f.officer_ca.id).len(), 1);
    }

    #[test]
    fn forged_user_signature_is_rejected() {
        let f = fixture();
        let mut req = request(&f, "YWJj");
        req.user_signature = f.citizen.sign("eHl6");
        let err = f.engine.apply_stamp(&req).unwrap_err();
        assert!(
            matches!(err, Error::Validation(ref m) if m == "user signature verification failed")
        );
        assert!(f.engine.stamps_for_document("YWJj").is_empty());
    }

    #[test]
    fn malformed_input_is_validation_error() {
        let f = fixture();
        let mut req = request(&f, "YWJj");
        req.document_hash = "not base64!".into();
        assert!(matches!(f.engine.apply_stamp(&req), Err(Error::Validation(_))));

        let mut req = request(&f, "YWJj");
        req.user_cert_pem = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----".into();
        assert!(matches!(f.engine.apply_stamp(&req), Err(Error::Validation(_))));
    }

    #[test]
    fn officer_ca_must_be_active() {
        let f = fixture();
        let mut req = request(&f, "YWJj");
        req.officer_ca_id = CaId::new();
        assert!(matches!(f.engine.apply_stamp(&req), Err(Error::NotFound(_))));

        f.hierarchy
            .revoke(&Caller::national_admin("admin"), f.officer_ca.id, "rotation")
            .unwrap();
        let req = request(&f, "YWJj");
        assert!(matches!(f.engine.apply_stamp(&req), Err(Error::Validation(_))));
    }

    #[test]
    fn tampered_document_fails_verification() {
        let f = fixture();
        let stamp = f.engine.apply_stamp(&request(&f, "YWJj")).unwrap();
        let verdict = f.engine.verify_stamp(
            "YWJk",
            &stamp.user_signature,
            &stamp.officer_signature,
            &stamp.officer_cert_pem,
        );
        assert!(!verdict.valid);
        assert_eq!(verdict.message, "invalid officer signature");
    }

    #[test]
    fn unreadable_certificate_is_verification_error() {
        let f = fixture();
        let verdict = f.engine.verify_stamp("YWJj", "c2lnMQ==", "c2ln", "garbage");
        assert!(!verdict.valid);
        assert_eq!(verdict.message, "verification error");
        assert!(verdict.details.is_empty());
    }

    #[test]
    fn expired_officer_certificate_invalidates_good_signature() {
        let f = fixture();
        let provider = MlDsaProvider::new();
        let officer = provider.generate_key_pair(SecurityLevel::MlDsa65).unwrap();
        let cert = CertificateBuilder::new("CN=Retired Officer CA", officer.public_key().clone())
            .not_before(Utc::now() - Duration::days(30))
            .validity_days(10)
            .ca(None)
            .self_signed(&provider, &officer)
            .unwrap();
        let payload = stamp_payload("YWJj", "c2lnMQ==");
        let signature = STANDARD.encode(provider.sign(officer.private_key(), &payload).unwrap());

        let verdict = f.engine.verify_stamp("YWJj", "c2lnMQ==", &signature, &cert.to_pem());
        assert!(!verdict.valid);
        assert_eq!(verdict.message, "officer certificate expired");
    }

    #[test]
    fn timestamp_token_is_checked_on_verify() {
        let tsa = LocalTsa::new(Arc::new(MlDsaProvider::new())).unwrap();
        let f = fixture_with(Some(Arc::new(tsa)));
        let stamp = f.engine.apply_stamp(&request(&f, "YWJj")).unwrap();
        let token = stamp.timestamp_token.clone().unwrap();
        let info = TstInfo::from_token(&token).unwrap();
        assert_eq!(
            info.hashed_message,
            STANDARD.encode(sha256(&stamp_payload("YWJj", &stamp.user_signature)))
        );

        let verdict = f.engine.verify_stamp(
            &stamp.document_hash,
            &stamp.user_signature,
            &stamp.officer_signature,
            &stamp.officer_cert_pem,
        );
        assert!(verdict.valid);
        assert_eq!(verdict.details["timestamp"], "valid");
    }

    #[test]
    fn timestamp_outage_still_stamps() {
        let f = fixture_with(Some(Arc::new(DownTsa)));
        let stamp = f.engine.apply_stamp(&request(&f, "YWJj")).unwrap();
        assert!(stamp.timestamp_token.is_none());
        assert_eq!(stamp.status, StampStatus::Active);
    }

    #[test]
    fn revoke_is_idempotent() {
        let f = fixture();
        let stamp = f.engine.apply_stamp(&request(&f, "YWJj")).unwrap();
        let first = f.engine.revoke_stamp(stamp.id, "supervisor").unwrap();
        assert_eq!(first.status, StampStatus::Revoked);
        assert_eq!(first.revoked_by.as_deref(), Some("supervisor"));

        let second = f.engine.revoke_stamp(stamp.id, "someone else").unwrap();
        assert_eq!(second.revoked_at, first.revoked_at);
        assert_eq!(second.revoked_by.as_deref(), Some("supervisor"));
        assert_eq!(f.audit.events_for(AuditAction::StampRevoked).len(), 1);

        assert!(matches!(
            f.engine.revoke_stamp(StampId::new(), "supervisor"),
            Err(Error::NotFound(_))
        ));
    }
}
