//! Signature activation for citizen keys held in custody.
//!
//! A signature is released in two steps. [`SapEngine::init`] takes a session
//! token proving who the user is and that they own the key, and opens a
//! short-lived challenge bound to one document hash. [`SapEngine::confirm`]
//! takes the user's current OTP, consumes the challenge and signs.
//!
//! A challenge yields at most one signature. Wrong OTPs count against it and
//! invalidate it after [`SapConfig::max_failed_attempts`]. Every refusal is
//! reported to callers as [`Error::Unauthorized`] with a stable code; the
//! detailed reason stays in logs and the audit trail.
//!
//! # Modules
//!
//! - [`engine`] - The two-phase protocol
//! - [`challenge`] - Challenge records and their store
//! - [`otp`] - OTP verification (TOTP)
//! - [`session`] - Session tokens and key ownership
//! - [`signer`] - Signing with custody keys
//! - [`config`] - Protocol settings
//! - [`api`] - Request and response types
//! - [`error`] - Error types

#![forbid(unsafe_code)]

pub mod api;
pub mod challenge;
pub mod config;
pub mod engine;
pub mod error;
pub mod otp;
pub mod session;
pub mod signer;

pub use api::{ChallengeCreated, InitSigningRequest, SignatureResult};
pub use challenge::{
    ChallengeState, ChallengeStore, FailedAttempt, SigningChallenge, generate_challenge_id,
};
pub use config::{SapConfig, TotpConfig};
pub use engine::SapEngine;
pub use error::{Error, Result, UnauthorizedCode};
pub use otp::{OtpVerifier, TotpVerifier};
pub use session::{JwtSessionVerifier, SessionClaims, SessionVerifier, VERIFIED, owns_key};
pub use signer::{CustodySigner, SigningCapability};
