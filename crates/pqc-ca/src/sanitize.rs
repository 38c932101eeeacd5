//! Input validation for names, subjects and encoded blobs.
//!
//! Every user-supplied string that ends up in a subject name, a key handle
//! hint or an audit record passes through here before any state changes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// Maximum length of a subject distinguished name override.
pub const MAX_SUBJECT_DN_LENGTH: usize = 256;

/// Maximum length of a free-text reason.
pub const MAX_REASON_LENGTH: usize = 512;

/// Maximum length of a DNS name (RFC 1035).
const MAX_DNS_NAME_LENGTH: usize = 253;

static SAFE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\s\-_.]{1,64}$").unwrap_or_else(|_| unreachable!()));

/// Characters that break out of a subject name or a shell argument.
static DANGEROUS_CHARS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[`$;|&<>(){}\[\]!#*?~]").unwrap_or_else(|_| unreachable!()));

static DNS_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^[a-zA-Z0-9*]([a-zA-Z0-9-]*[a-zA-Z0-9])?",
        r"(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)*$"
    ))
    .unwrap_or_else(|_| unreachable!())
});

/// Validates a single subject name component such as a CA or user name.
///
/// Allows letters, digits, whitespace, `-`, `_` and `.`, 1 to 64 characters.
///
/// # Errors
///
/// Returns [`Error::Validation`] naming `field` if the input is empty, carries
/// dangerous characters, or falls outside the safe set.
pub fn sanitize_dn_component(input: &str, field: &str) -> Result<String> {
    if input.trim().is_empty() {
        return Err(Error::Validation(format!("{field} cannot be empty")));
    }
    if DANGEROUS_CHARS_REGEX.is_match(input) {
        return Err(Error::Validation(format!("{field} contains dangerous characters")));
    }
    if !SAFE_NAME_REGEX.is_match(input) {
        return Err(Error::Validation(format!(
            concat!(
                "{field} may only contain letters, digits, spaces, ",
                "hyphens, underscores and dots (1-64 chars)"
            ),
            field = field
        )));
    }
    Ok(input.trim().to_string())
}

/// Validates a caller-supplied subject distinguished name.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the name is empty, too long, carries
/// control or dangerous characters, or has no `CN=` attribute.
pub fn sanitize_subject_dn(input: &str) -> Result<String> {
    let dn = input.trim();
    if dn.is_empty() {
        return Err(Error::Validation("subject DN cannot be empty".into()));
    }
    if dn.len() > MAX_SUBJECT_DN_LENGTH {
        return Err(Error::Validation(format!(
            "subject DN exceeds {MAX_SUBJECT_DN_LENGTH} characters"
        )));
    }
    if dn.chars().any(char::is_control) {
        return Err(Error::Validation("subject DN contains control characters".into()));
    }
    if DANGEROUS_CHARS_REGEX.is_match(dn) {
        return Err(Error::Validation("subject DN contains dangerous characters".into()));
    }
    if !dn.contains("CN=") {
        return Err(Error::Validation("subject DN must contain a CN attribute".into()));
    }
    Ok(dn.to_string())
}

/// Validates a free-text reason for a rejection or revocation.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the reason is blank, too long or carries
/// control characters.
pub fn sanitize_reason(input: &str) -> Result<String> {
    let reason = input.trim();
    if reason.is_empty() {
        return Err(Error::Validation("reason cannot be empty".into()));
    }
    if reason.chars().count() > MAX_REASON_LENGTH {
        return Err(Error::Validation(format!(
            "reason exceeds {MAX_REASON_LENGTH} characters"
        )));
    }
    if reason.chars().any(char::is_control) {
        return Err(Error::Validation("reason contains control characters".into()));
    }
    Ok(reason.to_string())
}

/// Validates a DNS subject alternative name.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the name is not a valid hostname.
pub fn sanitize_dns_name(input: &str) -> Result<String> {
    if input.is_empty() || input.len() > MAX_DNS_NAME_LENGTH || !DNS_NAME_REGEX.is_match(input) {
        return Err(Error::Validation(format!("invalid DNS name '{input}'")));
    }
    Ok(input.to_ascii_lowercase())
}

/// Decodes standard base64, reporting failures as validation errors.
///
/// # Errors
///
/// Returns [`Error::Validation`] naming `field` if the input is empty or not
/// valid base64.
pub fn decode_base64(input: &str, field: &str) -> Result<Vec<u8>> {
    if input.trim().is_empty() {
        return Err(Error::Validation(format!("{field} cannot be empty")));
    }
    STANDARD
        .decode(input.trim())
        .map_err(|_| Error::Validation(format!("{field} is not valid base64")))
}
