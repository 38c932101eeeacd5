//! # PQC Custody
//!
//! Custody of CA private keys behind opaque handles:
//!
//! - **Encrypted at rest**: keys are sealed with ChaCha20-Poly1305 under a
//!   per-handle key derived from the `CA_MASTER_KEY` master key
//! - **Legacy tolerant**: unprefixed plaintext PEM still loads, with a warning
//! - **Path safe**: handles are validated before they touch a filesystem
//!
//! ## Example
//!
//! ```rust
//! use pqc_crypto::{CryptoProvider, MlDsaProvider, SecurityLevel};
//! use pqc_custody::{KeyCustodyStore, KeyEncryptor, MasterKey, MemoryKeyStore};
//!
//! let store = MemoryKeyStore::new(KeyEncryptor::new(Some(MasterKey::generate())));
//! let pair = MlDsaProvider::new().generate_key_pair(SecurityLevel::MlDsa44).expect("keygen");
//!
//! let handle = store.encrypt_and_store("root-ca", pair.private_key()).expect("store");
//! let loaded = store.load_and_decrypt(&handle).expect("load");
//! assert_eq!(loaded.as_bytes(), pair.private_key().as_bytes());
//! ```

#![forbid(unsafe_code)]

pub mod encryption;
pub mod error;
pub mod handle;
pub mod store;

pub use encryption::{ENCRYPTED_PREFIX, KeyEncryptor, MASTER_KEY_ENV, MasterKey};
pub use error::{Error, Result};
pub use handle::KeyHandle;
pub use store::{FileKeyStore, KeyCustodyStore, MemoryKeyStore};
