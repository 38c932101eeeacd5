//! Request and response types of the signing protocol.

use chrono::{DateTime, Utc};
use pqc_crypto::SecurityLevel;
use serde::{Deserialize, Serialize};

/// Request to open a signing challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSigningRequest {
    /// Key to sign with.
    pub key_alias: String,
    /// Base64 document hash.
    pub document_hash: String,
    /// Requested algorithm, e.g. `ML-DSA-65`.
    pub algorithm: String,
}

/// A freshly opened challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeCreated {
    /// Identifier to present with the OTP.
    pub challenge_id: String,
    /// When the challenge stops being confirmable.
    pub expires_at: DateTime<Utc>,
}

/// Signature released by a confirmed challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureResult {
    /// Base64 signature over the decoded document hash.
    pub signature_base64: String,
    /// Key that signed.
    pub key_alias: String,
    /// Algorithm used.
    pub algorithm: SecurityLevel,
}
