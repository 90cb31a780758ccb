//! Secure Storage
//!
//! Opaque key/value persistence for the note ledger and the scan cursor.
//!
//! ```text
//! EncryptedFileStorage:
//!   <dir>/<hex(blake3(key))>.bin = nonce[12] || ChaCha20-Poly1305(value, aad = key)
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chacha20poly1305::{
    ChaCha20Poly1305,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

const STORAGE_KEY_CONTEXT: &str = "shroud storage key v1";
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored value for {0} failed authentication")]
    Decryption(String),

    #[error("failed to encrypt value for {0}")]
    Encryption(String),

    #[error("stored value for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Durable key/value store owned by one wallet session
pub trait SecureStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn store(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a raw entry, bypassing the wallet
    pub fn insert_raw(&self, key: &str, value: Vec<u8>) {
        self.entries().insert(key.to_string(), value);
    }

    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries().get(key).cloned()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SecureStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn store(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// File-backed storage sealed with ChaCha20-Poly1305
pub struct EncryptedFileStorage {
    dir: PathBuf,
    key: [u8; 32],
}

impl EncryptedFileStorage {
    /// Open (creating if needed) an encrypted store keyed by `seed`
    pub fn open(dir: impl AsRef<Path>, seed: &[u8]) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;

        Ok(Self {
            dir,
            key: blake3::derive_key(STORAGE_KEY_CONTEXT, seed),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = hex::encode(blake3::hash(key.as_bytes()).as_bytes());
        self.dir.join(format!("{name}.bin"))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(&self.key.into())
    }
}

impl SecureStorage for EncryptedFileStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key);
        let sealed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        if sealed.len() < NONCE_LEN {
            return Err(StorageError::Corrupt {
                key: key.to_string(),
                reason: format!("{} bytes is shorter than the nonce", sealed.len()),
            });
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce);

        let plaintext = self
            .cipher()
            .decrypt(
                &nonce_bytes.into(),
                Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StorageError::Decryption(key.to_string()))?;

        Ok(Some(plaintext))
    }

    fn store(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()
            .encrypt(
                &nonce.into(),
                Payload {
                    msg: value,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StorageError::Encryption(key.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &sealed).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StorageError::Io { path, source })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.load("notes").unwrap(), None);
        storage.store("notes", b"[]").unwrap();
        assert_eq!(storage.load("notes").unwrap(), Some(b"[]".to_vec()));
        storage.remove("notes").unwrap();
        assert_eq!(storage.load("notes").unwrap(), None);
    }

    #[test]
    fn test_encrypted_roundtrip_and_no_plaintext_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = EncryptedFileStorage::open(dir.path(), b"seed").unwrap();

        storage.store("notes", b"secret ledger").unwrap();
        assert_eq!(
            storage.load("notes").unwrap(),
            Some(b"secret ledger".to_vec())
        );

        for entry in fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name().into_string().unwrap();
            assert!(!name.contains("notes"), "file names must not leak keys");
            let raw = fs::read(dir.path().join(&name)).unwrap();
            assert!(!raw.windows(6).any(|w| w == b"secret"));
        }
    }

    #[test]
    fn test_wrong_seed_fails_authentication() {
        let dir = tempfile::tempdir().unwrap();
        EncryptedFileStorage::open(dir.path(), b"seed-a")
            .unwrap()
            .store("notes", b"data")
            .unwrap();

        let other = EncryptedFileStorage::open(dir.path(), b"seed-b").unwrap();
        assert!(matches!(
            other.load("notes"),
            Err(StorageError::Decryption(_))
        ));
    }

    #[test]
    fn test_missing_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = EncryptedFileStorage::open(dir.path(), b"seed").unwrap();
        assert_eq!(storage.load("cursor").unwrap(), None);
        storage.remove("cursor").unwrap();
        storage.store("cursor", b"abc").unwrap();
        storage.remove("cursor").unwrap();
        assert_eq!(storage.load("cursor").unwrap(), None);
    }
}
