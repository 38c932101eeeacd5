//! Two-phase signing: open a challenge with a session, release the signature
//! with an OTP.

use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use pqc_audit::{AuditAction, AuditEvent, AuditLogger, Severity, record_or_warn};
use pqc_crypto::SecurityLevel;
use pqc_custody::KeyHandle;
use tracing::{debug, info, warn};

use crate::api::{ChallengeCreated, InitSigningRequest, SignatureResult};
use crate::challenge::{ChallengeState, ChallengeStore, SigningChallenge, generate_challenge_id};
use crate::config::SapConfig;
use crate::error::{Error, Result};
use crate::otp::OtpVerifier;
use crate::session::SessionVerifier;
use crate::signer::SigningCapability;

/// The signature activation engine.
pub struct SapEngine {
    config: SapConfig,
    challenges: ChallengeStore,
    sessions: Arc<dyn SessionVerifier>,
    otp: Arc<dyn OtpVerifier>,
    signer: Arc<dyn SigningCapability>,
    audit: Arc<dyn AuditLogger>,
}

impl std::fmt::Debug for SapEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SapEngine")
            .field("config", &self.config)
            .field("challenges", &self.challenges.len())
            .finish_non_exhaustive()
    }
}

fn target(challenge_id: &str) -> String {
    format!("challenge:{challenge_id}")
}

impl SapEngine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the configuration is invalid.
    pub fn new(
        config: SapConfig,
        sessions: Arc<dyn SessionVerifier>,
        otp: Arc<dyn OtpVerifier>,
        signer: Arc<dyn SigningCapability>,
        audit: Arc<dyn AuditLogger>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            challenges: ChallengeStore::new(),
            sessions,
            otp,
            signer,
            audit,
        })
    }

    /// Opens a challenge binding `username`, key, document hash and algorithm.
    ///
    /// The session token is checked before anything else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] or [`Error::Unauthorized`] if the session
    /// does not prove `username` owns the key, or [`Error::Validation`] for
    /// a bad alias, hash or algorithm.
    pub fn init(
        &self,
        session_token: &str,
        username: &str,
        request: &InitSigningRequest,
    ) -> Result<ChallengeCreated> {
        self.init_at(session_token, username, request, Utc::now())
    }

    fn init_at(
        &self,
        session_token: &str,
        username: &str,
        request: &InitSigningRequest,
        now: DateTime<Utc>,
    ) -> Result<ChallengeCreated> {
        let owner = self.sessions.verify(session_token, &request.key_alias)?;
        if owner != username {
            warn!(user = %username, session = %owner, "session belongs to another user");
            return Err(Error::Session {
                reason: "session does not belong to the requesting user".into(),
            });
        }
        KeyHandle::new(request.key_alias.as_str())?;
        let algorithm = SecurityLevel::from_str(&request.algorithm)?;
        let hash = request.document_hash.trim();
        if hash.is_empty() || STANDARD.decode(hash).is_err() {
            return Err(Error::validation("document hash must be non-empty base64"));
        }

        let swept = self.challenges.sweep(now);
        if swept > 0 {
            debug!(swept, "dropped stale challenges");
        }

        let challenge = SigningChallenge {
            challenge_id: generate_challenge_id(),
            username: username.to_string(),
            key_alias: request.key_alias.clone(),
            document_hash: hash.to_string(),
            algorithm,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.challenge_ttl_secs),
            state: ChallengeState::Created,
            failed_attempts: 0,
        };
        let created = ChallengeCreated {
            challenge_id: challenge.challenge_id.clone(),
            expires_at: challenge.expires_at,
        };
        self.challenges.insert(challenge)?;

        info!(user = %username, alias = %request.key_alias, %algorithm, "opened signing challenge");
        record_or_warn(
            self.audit.as_ref(),
            &AuditEvent::success(
                username,
                AuditAction::SigningChallengeCreated,
                target(&created.challenge_id),
            )
            .with_detail("key_alias", &request.key_alias)
            .with_detail("algorithm", algorithm),
        );
        Ok(created)
    }

    /// Confirms a challenge with the user's current OTP and returns the signature.
    ///
    /// The challenge is consumed before the key is used, so it yields at most
    /// one signature however many confirmations race.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown challenge,
    /// [`Error::Unauthorized`] for a wrong OTP or a used, cancelled or expired
    /// challenge, or [`Error::Signing`] if the key cannot sign.
    pub fn confirm(&self, challenge_id: &str, otp_code: &str) -> Result<SignatureResult> {
        self.confirm_at(challenge_id, otp_code, Utc::now())
    }

    fn confirm_at(
        &self,
        challenge_id: &str,
        otp_code: &str,
        now: DateTime<Utc>,
    ) -> Result<SignatureResult> {
        let challenge = self.challenges.get(challenge_id).ok_or_else(|| Error::NotFound {
            what: format!("challenge {challenge_id}"),
        })?;
        if let Err(e) = challenge.ensure_usable(now) {
            self.reject(&challenge, &e, false);
            return Err(e);
        }

        let valid = self
            .otp
            .verify(&challenge.username, otp_code, now)
            .map_err(|e| match e {
                Error::NotFound { .. } => Error::otp_invalid("no OTP secret enrolled"),
                other => other,
            })?;
        if !valid {
            let attempt = self
                .challenges
                .record_failure(challenge_id, self.config.max_failed_attempts)?;
            let err = Error::otp_invalid(if attempt.invalidated {
                "wrong OTP, challenge invalidated"
            } else {
                "wrong OTP"
            });
            self.reject(&challenge, &err, attempt.invalidated);
            return Err(err);
        }

        let challenge = self.challenges.consume(challenge_id, now).inspect_err(|e| {
            self.reject(&challenge, e, false);
        })?;
        let hash = STANDARD
            .decode(&challenge.document_hash)
            .map_err(|_| Error::validation("stored document hash is not base64"))?;
        let signature = match self.signer.sign(&challenge.key_alias, &hash, challenge.algorithm) {
            Ok(signature) => signature,
            Err(e) => {
                warn!(
                    user = %challenge.username,
                    alias = %challenge.key_alias,
                    error = %e,
                    "signing failed after confirmation"
                );
                record_or_warn(
                    self.audit.as_ref(),
                    &AuditEvent::failure(
                        &challenge.username,
                        AuditAction::SigningConfirmed,
                        target(challenge_id),
                    )
                    .with_detail("error", &e),
                );
                return Err(e);
            }
        };

        info!(user = %challenge.username, alias = %challenge.key_alias, "released signature");
        record_or_warn(
            self.audit.as_ref(),
            &AuditEvent::success(
                &challenge.username,
                AuditAction::SigningConfirmed,
                target(challenge_id),
            )
            .with_detail("key_alias", &challenge.key_alias)
            .with_detail("algorithm", challenge.algorithm),
        );
        Ok(SignatureResult {
            signature_base64: STANDARD.encode(signature),
            key_alias: challenge.key_alias,
            algorithm: challenge.algorithm,
        })
    }

    /// Logs and audits a refused confirmation.
    fn reject(&self, challenge: &SigningChallenge, err: &Error, invalidated: bool) {
        let reason = match err {
            Error::Unauthorized { reason, .. } => reason.as_str(),
            _ => "refused",
        };
        warn!(
            user = %challenge.username,
            challenge = %challenge.challenge_id,
            reason,
            "signing confirmation refused"
        );
        let mut event = AuditEvent::failure(
            &challenge.username,
            AuditAction::OtpRejected,
            target(&challenge.challenge_id),
        )
        .with_detail("reason", reason);
        if invalidated {
            event = event.with_severity(Severity::High);
        }
        record_or_warn(self.audit.as_ref(), &event);
    }

    /// Withdraws a challenge; it can never be confirmed afterwards.
    ///
    /// Cancelling a challenge that is already spent changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown challenge.
    pub fn cancel(&self, challenge_id: &str) -> Result<()> {
        let challenge = self.challenges.cancel(challenge_id)?;
        if challenge.state == ChallengeState::Cancelled {
            info!(user = %challenge.username, "cancelled signing challenge");
            record_or_warn(
                self.audit.as_ref(),
                &AuditEvent::success(
                    &challenge.username,
                    AuditAction::SigningChallengeCancelled,
                    target(challenge_id),
                ),
            );
        }
        Ok(())
    }

    /// Drops expired and spent challenges. Advisory; returns how many went.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        self.challenges.sweep(now)
    }

    /// A copy of a challenge, for status queries.
    #[must_use]
    pub fn challenge(&self, challenge_id: &str) -> Option<SigningChallenge> {
        self.challenges.get(challenge_id)
    }
}
