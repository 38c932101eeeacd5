//! Post-quantum crypto primitives for the PQC PKI.
#![forbid(unsafe_code)]
//!
//! This crate provides the signing capability and the signed artifacts the
//! authority engines are built on.
//!
//! # Overview
//!
//! - [`SecurityLevel`] parses and describes the ML-DSA parameter sets
//! - [`CryptoProvider`] generates keys, signs and verifies; [`MlDsaProvider`]
//!   implements it with FIPS 204 ML-DSA
//! - [`Certificate`], [`CertificationRequest`] and [`Crl`] are signed artifacts
//!   with PEM armour
//!
//! # Example
//!
//! ```
//! use pqc_crypto::{CertificateBuilder, CryptoProvider, MlDsaProvider, SecurityLevel};
//!
//! let provider = MlDsaProvider::new();
//! let pair = provider.generate_key_pair(SecurityLevel::MlDsa65).unwrap();
//!
//! let root = CertificateBuilder::new("CN=Root,O=Gov,C=VN", pair.public_key().clone())
//!     .validity_days(3650)
//!     .ca(None)
//!     .self_signed(&provider, &pair)
//!     .unwrap();
//!
//! assert!(root.to_pem().contains("BEGIN CERTIFICATE"));
//! ```

pub mod cert;
pub mod crl;
pub mod csr;
pub mod digest;
mod envelope;
pub mod error;
pub mod keys;
pub mod level;
pub mod pem;
pub mod provider;
pub mod serial;
pub mod validation;

pub use cert::{Certificate, CertificateBuilder, KeyUsage};
pub use crl::{Crl, CrlBuilder, RevokedEntry};
pub use csr::CertificationRequest;
pub use digest::{sha256, sha256_hex};
pub use error::{Error, Result};
pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use level::{ALL_LEVELS, SecurityLevel};
pub use provider::{CryptoProvider, MlDsaProvider};
pub use serial::{generate_serial, is_valid_serial};
pub use validation::{
    is_expired, is_expired_at, is_not_yet_valid, is_valid_now, validate_certificate, validate_chain,
};
