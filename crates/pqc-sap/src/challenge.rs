//! Signing challenges and their store.
//!
//! A challenge fixes what will be signed (user, key, document hash and
//! algorithm) at creation. Every state change happens inside one critical
//! section of the store, so two confirmations can never both consume it.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pqc_crypto::SecurityLevel;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Random bytes in a challenge id.
pub const CHALLENGE_ID_BYTES: usize = 24;

/// Generates a challenge id: 24 random bytes, base64url without padding.
#[must_use]
pub fn generate_challenge_id() -> String {
    let mut bytes = [0u8; CHALLENGE_ID_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Lifecycle of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeState {
    /// Awaiting its OTP.
    Created,
    /// Consumed by a successful confirmation.
    Confirmed,
    /// Withdrawn by the user.
    Cancelled,
    /// Too many wrong OTPs.
    Invalidated,
}

impl ChallengeState {
    /// Returns the string representation of this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Invalidated => "INVALIDATED",
        }
    }
}

/// A pending intent to sign one document hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningChallenge {
    /// Identifier.
    pub challenge_id: String,
    /// User whose OTP confirms the challenge.
    pub username: String,
    /// Key to sign with.
    pub key_alias: String,
    /// Base64 document hash to sign.
    pub document_hash: String,
    /// Requested algorithm.
    pub algorithm: SecurityLevel,
    /// When the challenge was created.
    pub created_at: DateTime<Utc>,
    /// When it stops being confirmable.
    pub expires_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: ChallengeState,
    /// Wrong OTPs presented so far.
    pub failed_attempts: u32,
}

impl SigningChallenge {
    /// Whether the challenge is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Fails unless the challenge can still be confirmed at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`]; the internal reason says why.
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            ChallengeState::Created if self.is_expired_at(now) => {
                Err(Error::otp_invalid("challenge expired"))
            }
            ChallengeState::Created => Ok(()),
            ChallengeState::Confirmed => Err(Error::otp_invalid("challenge already used")),
            ChallengeState::Cancelled => Err(Error::otp_invalid("challenge cancelled")),
            ChallengeState::Invalidated => {
                Err(Error::otp_invalid("challenge invalidated after failed attempts"))
            }
        }
    }
}

/// Outcome of recording a wrong OTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedAttempt {
    /// Wrong OTPs so far, including this one.
    pub attempts: u32,
    /// Whether this attempt invalidated the challenge.
    pub invalidated: bool,
}

/// In-memory challenge table.
#[derive(Debug, Default)]
pub struct ChallengeStore {
    challenges: Mutex<HashMap<String, SigningChallenge>>,
}

fn not_found(challenge_id: &str) -> Error {
    Error::NotFound {
        what: format!("challenge {challenge_id}"),
    }
}

impl ChallengeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a challenge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the id is already taken.
    pub fn insert(&self, challenge: SigningChallenge) -> Result<()> {
        let mut challenges = self.challenges.lock();
        if challenges.contains_key(&challenge.challenge_id) {
            return Err(Error::validation("challenge id collision"));
        }
        challenges.insert(challenge.challenge_id.clone(), challenge);
        Ok(())
    }

    /// A copy of a challenge.
    #[must_use]
    pub fn get(&self, challenge_id: &str) -> Option<SigningChallenge> {
        self.challenges.lock().get(challenge_id).cloned()
    }

    /// Number of challenges held, spent ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.challenges.lock().len()
    }

    /// Whether the store holds no challenges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.challenges.lock().is_empty()
    }

    /// Moves a usable challenge to [`ChallengeState::Confirmed`].
    ///
    /// Check and transition happen under one lock; of any number of concurrent
    /// callers at most one succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id and
    /// [`Error::Unauthorized`] if the challenge is no longer usable.
    pub fn consume(&self, challenge_id: &str, now: DateTime<Utc>) -> Result<SigningChallenge> {
        let mut challenges = self.challenges.lock();
        let challenge = challenges
            .get_mut(challenge_id)
            .ok_or_else(|| not_found(challenge_id))?;
        challenge.ensure_usable(now)?;
        challenge.state = ChallengeState::Confirmed;
        Ok(challenge.clone())
    }

    /// Counts a wrong OTP, invalidating the challenge at `max_attempts`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub fn record_failure(&self, challenge_id: &str, max_attempts: u32) -> Result<FailedAttempt> {
        let mut challenges = self.challenges.lock();
        let challenge = challenges
            .get_mut(challenge_id)
            .ok_or_else(|| not_found(challenge_id))?;
        challenge.failed_attempts = challenge.failed_attempts.saturating_add(1);
        let invalidated =
            challenge.state == ChallengeState::Created && challenge.failed_attempts >= max_attempts;
        if invalidated {
            challenge.state = ChallengeState::Invalidated;
        }
        Ok(FailedAttempt {
            attempts: challenge.failed_attempts,
            invalidated,
        })
    }

    /// Cancels a challenge still awaiting its OTP.
    ///
    /// Returns the state after the call; spent challenges are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub fn cancel(&self, challenge_id: &str) -> Result<SigningChallenge> {
        let mut challenges = self.challenges.lock();
        let challenge = challenges
            .get_mut(challenge_id)
            .ok_or_else(|| not_found(challenge_id))?;
        if challenge.state == ChallengeState::Created {
            challenge.state = ChallengeState::Cancelled;
        }
        Ok(challenge.clone())
    }

    /// Drops expired and spent challenges. Returns how many were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut challenges = self.challenges.lock();
        let before = challenges.len();
        challenges.retain(|_, c| c.state == ChallengeState::Created && !c.is_expired_at(now));
        before - challenges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    fn challenge(now: DateTime<Utc>) -> SigningChallenge {
        SigningChallenge {
            challenge_id: generate_challenge_id(),
            username: "alice".into(),
            key_alias: "alice_signing".into(),
            document_hash: "YWJj".into(),
            algorithm: SecurityLevel::MlDsa65,
            created_at: now,
            expires_at: now + Duration::seconds(300),
            state: ChallengeState::Created,
            failed_attempts: 0,
        }
    }

    fn reason(err: Error) -> String {
        match err {
            Error::Unauthorized { reason, .. } => reason,
            other => other.to_string(),
        }
    }

    #[test]
    fn ids_are_url_safe_and_unique() {
        let ids: HashSet<_> = (0..64).map(|_| generate_challenge_id()).collect();
        assert_eq!(ids.len(), 64);
        for id in &ids {
            assert_eq!(id.len(), 32);
            assert!(id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        }
    }

    #[test]
    fn consume_is_one_shot() {
        let store = ChallengeStore::new();
        let now = Utc::now();
        let c = challenge(now);
        store.insert(c.clone()).unwrap();

        assert_eq!(store.consume(&c.challenge_id, now).unwrap().state, ChallengeState::Confirmed);
        let err = store.consume(&c.challenge_id, now).unwrap_err();
        assert_eq!(reason(err), "challenge already used");
    }

    #[test]
    fn concurrent_consumers_admit_one() {
        let store = ChallengeStore::new();
        let now = Utc::now();
        let c = challenge(now);
        store.insert(c.clone()).unwrap();

        let wins = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.consume(&c.challenge_id, now).is_ok()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count()
        });
        assert_eq!(wins, 1);
    }

    #[test]
    fn expired_challenge_cannot_be_consumed() {
        let store = ChallengeStore::new();
        let now = Utc::now();
        let c = challenge(now);
        store.insert(c.clone()).unwrap();
        let err = store.consume(&c.challenge_id, c.expires_at).unwrap_err();
        assert_eq!(reason(err), "challenge expired");
        assert_eq!(store.get(&c.challenge_id).unwrap().state, ChallengeState::Created);
    }

    #[test]
    fn failures_invalidate_at_limit() {
        let store = ChallengeStore::new();
        let now = Utc::now();
        let c = challenge(now);
        store.insert(c.clone()).unwrap();

        assert!(!store.record_failure(&c.challenge_id, 3).unwrap().invalidated);
        assert!(!store.record_failure(&c.challenge_id, 3).unwrap().invalidated);
        let third = store.record_failure(&c.challenge_id, 3).unwrap();
        assert_eq!(third, FailedAttempt { attempts: 3, invalidated: true });
        assert!(store.consume(&c.challenge_id, now).is_err());
    }

    #[test]
    fn cancel_blocks_confirmation_but_not_history() {
        let store = ChallengeStore::new();
        let now = Utc::now();
        let open = challenge(now);
        let used = challenge(now);
        store.insert(open.clone()).unwrap();
        store.insert(used.clone()).unwrap();
        store.consume(&used.challenge_id, now).unwrap();

        assert_eq!(store.cancel(&open.challenge_id).unwrap().state, ChallengeState::Cancelled);
        assert_eq!(
            reason(store.consume(&open.challenge_id, now).unwrap_err()),
            "challenge cancelled"
        );
        assert_eq!(store.cancel(&used.challenge_id).unwrap().state, ChallengeState::Confirmed);
        assert!(matches!(store.cancel("missing"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn sweep_keeps_only_live_challenges() {
        let store = ChallengeStore::new();
        let now = Utc::now();
        let live = challenge(now);
        let mut stale = challenge(now - Duration::seconds(600));
        stale.expires_at = now - Duration::seconds(1);
        let spent = challenge(now);
        for c in [&live, &stale, &spent] {
            store.insert(c.clone()).unwrap();
        }
        store.consume(&spent.challenge_id, now).unwrap();

        assert_eq!(store.sweep(now), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get(&live.challenge_id).is_some());
    }
}
