//! Key custody backends.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use pqc_crypto::PrivateKey;
use tracing::{debug, info};

use crate::encryption::KeyEncryptor;
use crate::error::{Error, Result};
use crate::handle::KeyHandle;

/// Storage for CA private keys, addressed by opaque handles.
pub trait KeyCustodyStore: Send + Sync {
    /// Stores `key` under a freshly generated handle derived from `alias_hint`.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing or the backend write fails.
    fn encrypt_and_store(&self, alias_hint: &str, key: &PrivateKey) -> Result<KeyHandle> {
        let handle = KeyHandle::generate(alias_hint);
        self.store_with_handle(&handle, key)?;
        Ok(handle)
    }

    /// Stores `key` under a caller-chosen handle, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing or the backend write fails.
    fn store_with_handle(&self, handle: &KeyHandle, key: &PrivateKey) -> Result<()>;

    /// Loads and decrypts the key stored under `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if nothing is stored under the handle.
    fn load_and_decrypt(&self, handle: &KeyHandle) -> Result<PrivateKey>;

    /// Whether a key is stored under `handle`.
    fn contains(&self, handle: &KeyHandle) -> bool;

    /// Removes the key stored under `handle`, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn delete(&self, handle: &KeyHandle) -> Result<bool>;
}

/// In-memory custody store.
///
/// Keys are held in their sealed form, so encryption behaves exactly as it
/// does for on-disk storage.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    encryptor: KeyEncryptor,
    sealed: RwLock<HashMap<KeyHandle, String>>,
}

impl MemoryKeyStore {
    /// Creates a store that seals keys with `encryptor`.
    #[must_use]
    pub fn new(encryptor: KeyEncryptor) -> Self {
        Self {
            encryptor,
            sealed: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the sealed form stored under `handle`.
    #[must_use]
    pub fn sealed(&self, handle: &KeyHandle) -> Option<String> {
        self.sealed.read().get(handle).cloned()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sealed.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sealed.read().is_empty()
    }
}

impl KeyCustodyStore for MemoryKeyStore {
    fn store_with_handle(&self, handle: &KeyHandle, key: &PrivateKey) -> Result<()> {
        let sealed = self.encryptor.seal(handle, key)?;
        self.sealed.write().insert(handle.clone(), sealed);
        debug!(handle = %handle, "stored private key in memory");
        Ok(())
    }

    fn load_and_decrypt(&self, handle: &KeyHandle) -> Result<PrivateKey> {
        let sealed = self.sealed(handle).ok_or_else(|| Error::KeyNotFound {
            handle: handle.to_string(),
        })?;
        self.encryptor.open(handle, &sealed)
    }

    fn contains(&self, handle: &KeyHandle) -> bool {
        self.sealed.read().contains_key(handle)
    }

    fn delete(&self, handle: &KeyHandle) -> Result<bool> {
        Ok(self.sealed.write().remove(handle).is_some())
    }
}

/// File-backed custody store writing one `<handle>.key` file per key.
#[derive(Debug)]
pub struct FileKeyStore {
    root: PathBuf,
    encryptor: KeyEncryptor,
}

impl FileKeyStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>, encryptor: KeyEncryptor) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| storage_error(&root, &e))?;
        info!(path = %root.display(), encrypted = encryptor.is_encrypting(), "opened key store");
        Ok(Self { root, encryptor })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, handle: &KeyHandle) -> PathBuf {
        self.root.join(format!("{handle}.key"))
    }
}

impl KeyCustodyStore for FileKeyStore {
    fn store_with_handle(&self, handle: &KeyHandle, key: &PrivateKey) -> Result<()> {
        let sealed = self.encryptor.seal(handle, key)?;
        let path = self.path_for(handle);
        let tmp = self.root.join(format!(".{handle}.key.tmp"));

        write_private(&tmp, sealed.as_bytes()).map_err(|e| storage_error(&tmp, &e))?;
        fs::rename(&tmp, &path).map_err(|e| storage_error(&path, &e))?;

        debug!(handle = %handle, path = %path.display(), "stored private key");
        Ok(())
    }

    fn load_and_decrypt(&self, handle: &KeyHandle) -> Result<PrivateKey> {
        let path = self.path_for(handle);
        let sealed = match fs::read_to_string(&path) {
            Ok(sealed) => sealed,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::KeyNotFound {
                    handle: handle.to_string(),
                });
            }
            Err(e) => return Err(storage_error(&path, &e)),
        };
        self.encryptor.open(handle, &sealed)
    }

    fn contains(&self, handle: &KeyHandle) -> bool {
        self.path_for(handle).is_file()
    }

    fn delete(&self, handle: &KeyHandle) -> Result<bool> {
        let path = self.path_for(handle);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_error(&path, &e)),
        }
    }
}

fn storage_error(path: &Path, e: &std::io::Error) -> Error {
    Error::Storage {
        reason: format!("{}: {e}", path.display()),
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
