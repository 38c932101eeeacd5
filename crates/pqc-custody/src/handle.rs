//! Opaque key handles.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A validated, path-safe identifier for stored key material.
///
/// Handles must:
/// - Be between 1 and 64 characters
/// - Contain only ASCII alphanumerics, hyphens and underscores
///
/// This rules out path separators and `..` so a handle can safely name a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyHandle(String);

impl KeyHandle {
    /// Maximum length of a handle.
    pub const MAX_LENGTH: usize = 64;

    /// Longest alias prefix kept when generating a handle.
    const HINT_LENGTH: usize = 27;

    /// Creates a handle after validating the input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the identifier is unsafe.
    pub fn new(handle: impl Into<String>) -> Result<Self> {
        let handle = handle.into();
        validate(&handle)?;
        Ok(Self(handle))
    }

    /// Generates a fresh unique handle, prefixed with a sanitised hint.
    #[must_use]
    pub fn generate(hint: &str) -> Self {
        let mut prefix: String = hint
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .take(Self::HINT_LENGTH)
            .collect();
        if prefix.is_empty() {
            prefix.push_str("key");
        }
        Self(format!("{prefix}-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for KeyHandle {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<KeyHandle> for String {
    fn from(handle: KeyHandle) -> Self {
        handle.0
    }
}

impl AsRef<str> for KeyHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate(handle: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidHandle {
        reason: reason.to_string(),
    };

    if handle.is_empty() {
        return Err(invalid("handle cannot be empty"));
    }
    if handle.len() > KeyHandle::MAX_LENGTH {
        return Err(invalid("handle exceeds 64 characters"));
    }
    if handle.contains("..") || handle.contains('/') || handle.contains('\\') {
        return Err(invalid("handle contains a path component"));
    }
    if !handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid(
            "handle must contain only alphanumeric characters, hyphens, and underscores",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("root-ca" ; "simple")]
    #[test_case("Province_HN-01" ; "mixed case")]
    #[test_case("a" ; "single char")]
    fn accepts(handle: &str) {
        assert_eq!(KeyHandle::new(handle).unwrap().as_str(), handle);
    }

    #[test_case("" ; "empty")]
    #[test_case("../etc/passwd" ; "traversal")]
    #[test_case("keys/root" ; "slash")]
    #[test_case("keys\\root" ; "backslash")]
    #[test_case("root ca" ; "space")]
    #[test_case("root;rm" ; "shell metachar")]
    fn rejects(handle: &str) {
        assert!(matches!(KeyHandle::new(handle), Err(Error::InvalidHandle { .. })));
    }

    #[test]
    fn rejects_overlong() {
        assert!(KeyHandle::new("a".repeat(65)).is_err());
        assert!(KeyHandle::new("a".repeat(64)).is_ok());
    }

    #[test]
    fn generated_handles_are_unique() {
        let a = KeyHandle::generate("Hanoi CA");
        let b = KeyHandle::generate("Hanoi CA");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("hanoi-ca-"));
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let handle = KeyHandle::new("root-ca").unwrap();
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, "\"root-ca\"");
        assert_eq!(serde_json::from_str::<KeyHandle>(&json).unwrap(), handle);
        assert!(serde_json::from_str::<KeyHandle>("\"../root\"").is_err());
    }

    proptest! {
        #[test]
        fn generated_handles_always_validate(hint in ".{0,80}") {
            let handle = KeyHandle::generate(&hint);
            prop_assert!(KeyHandle::new(handle.as_str()).is_ok());
        }
    }
}
