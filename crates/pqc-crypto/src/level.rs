//! Post-quantum security levels.
//!
//! Every key, certificate and authority in the PKI operates at one of the three
//! ML-DSA parameter sets from FIPS 204. Keys identify their level by encoded
//! length; requested algorithm names are parsed here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// ML-DSA parameter set.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum SecurityLevel {
    /// ML-DSA-44 (NIST category 2).
    #[serde(rename = "ML-DSA-44")]
    MlDsa44,
    /// ML-DSA-65 (NIST category 3).
    #[default]
    #[serde(rename = "ML-DSA-65")]
    MlDsa65,
    /// ML-DSA-87 (NIST category 5).
    #[serde(rename = "ML-DSA-87")]
    MlDsa87,
}

/// All supported levels, lowest first.
pub const ALL_LEVELS: [SecurityLevel; 3] = [
    SecurityLevel::MlDsa44,
    SecurityLevel::MlDsa65,
    SecurityLevel::MlDsa87,
];

impl SecurityLevel {
    /// Returns the canonical algorithm name, e.g. `ML-DSA-65`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MlDsa44 => "ML-DSA-44",
            Self::MlDsa65 => "ML-DSA-65",
            Self::MlDsa87 => "ML-DSA-87",
        }
    }

    /// NIST security category.
    #[must_use]
    pub const fn nist_category(&self) -> u8 {
        match self {
            Self::MlDsa44 => 2,
            Self::MlDsa65 => 3,
            Self::MlDsa87 => 5,
        }
    }

    /// Encoded verification key size in bytes.
    #[must_use]
    pub const fn public_key_size(&self) -> usize {
        match self {
            Self::MlDsa44 => 1312,
            Self::MlDsa65 => 1952,
            Self::MlDsa87 => 2592,
        }
    }

    /// Encoded signing key size in bytes.
    #[must_use]
    pub const fn private_key_size(&self) -> usize {
        match self {
            Self::MlDsa44 => 2560,
            Self::MlDsa65 => 4032,
            Self::MlDsa87 => 4896,
        }
    }

    /// Signature size in bytes.
    #[must_use]
    pub const fn signature_size(&self) -> usize {
        match self {
            Self::MlDsa44 => 2420,
            Self::MlDsa65 => 3309,
            Self::MlDsa87 => 4627,
        }
    }

    /// Identifies a level from an encoded public key length.
    #[must_use]
    pub fn from_public_key_len(len: usize) -> Option<Self> {
        ALL_LEVELS.into_iter().find(|l| l.public_key_size() == len)
    }

    /// Identifies a level from an encoded private key length.
    #[must_use]
    pub fn from_private_key_len(len: usize) -> Option<Self> {
        ALL_LEVELS.into_iter().find(|l| l.private_key_size() == len)
    }

    /// Whitelist parse for algorithms requested when creating an authority.
    ///
    /// Only ML-DSA-65 and ML-DSA-87 may back a CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedAlgorithm`] for anything else.
    pub fn parse_allowed(name: &str) -> Result<Self> {
        match normalize(name).as_str() {
            "mldsa65" => Ok(Self::MlDsa65),
            "mldsa87" => Ok(Self::MlDsa87),
            _ => Err(Error::UnsupportedAlgorithm(format!(
                "'{}' is not an allowed CA algorithm (ML-DSA-65, ML-DSA-87)",
                name.chars().take(32).collect::<String>()
            ))),
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "mldsa44" => Ok(Self::MlDsa44),
            "mldsa65" => Ok(Self::MlDsa65),
            "mldsa87" => Ok(Self::MlDsa87),
            _ => Err(Error::UnsupportedAlgorithm(s.chars().take(32).collect())),
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("mldsa65", SecurityLevel::MlDsa65)]
    #[test_case("ML-DSA-87", SecurityLevel::MlDsa87)]
    #[test_case("ml-dsa-65", SecurityLevel::MlDsa65)]
    fn allowed_parse_accepts(input: &str, expected: SecurityLevel) {
        assert_eq!(SecurityLevel::parse_allowed(input).unwrap(), expected);
    }

    #[test_case("mldsa44")]
    #[test_case("ecdsa")]
    #[test_case("mldsa65; rm -rf /")]
    fn allowed_parse_rejects(input: &str) {
        assert!(matches!(
            SecurityLevel::parse_allowed(input),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn sizes_identify_levels() {
        for level in ALL_LEVELS {
            assert_eq!(
                SecurityLevel::from_public_key_len(level.public_key_size()),
                Some(level)
            );
            assert_eq!(
                SecurityLevel::from_private_key_len(level.private_key_size()),
                Some(level)
            );
        }
        assert_eq!(SecurityLevel::from_public_key_len(32), None);
    }

    #[test]
    fn serde_uses_canonical_names() {
        let json = serde_json::to_string(&SecurityLevel::MlDsa65).unwrap();
        assert_eq!(json, "\"ML-DSA-65\"");
        let back: SecurityLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SecurityLevel::MlDsa65);
    }

    #[test]
    fn from_str_is_strict() {
        assert_eq!("ml-dsa-44".parse::<SecurityLevel>().unwrap(), SecurityLevel::MlDsa44);
        assert!("dilithium".parse::<SecurityLevel>().is_err());
    }

    proptest! {
        #[test]
        fn key_length_identifies_at_most_one_level(len in 0usize..6000) {
            match SecurityLevel::from_public_key_len(len) {
                Some(level) => prop_assert_eq!(level.public_key_size(), len),
                None => prop_assert!(ALL_LEVELS.iter().all(|l| l.public_key_size() != len)),
            }
        }
    }
}
