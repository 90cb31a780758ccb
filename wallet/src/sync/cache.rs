//! Commitment-by-index cache and scan cursor
//!
//! Persisted after every sync whose rebuilt root matched the tree account.
//! The cursor is the newest signature the cached leaves account for, so the
//! next scan only walks newer history.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shroud_privacy::field::{self, Fr};
use solana_sdk::signature::Signature;

use crate::error::WalletError;
use crate::storage::{SecureStorage, StorageError};

pub const LEAF_CACHE_KEY: &str = "leaf_cache";
pub const CURSOR_KEY: &str = "scan_cursor";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafCache {
    pub cursor: Option<Signature>,
    pub leaves: BTreeMap<u64, Fr>,
}

#[derive(Serialize, Deserialize)]
struct StoredLeaves {
    leaves: BTreeMap<u64, String>,
}

impl LeafCache {
    pub fn load<S: SecureStorage>(storage: &S) -> Result<Self, WalletError> {
        let cursor = match storage.load(CURSOR_KEY)? {
            Some(bytes) => {
                let text = String::from_utf8(bytes).map_err(|e| corrupt(CURSOR_KEY, e))?;
                Some(Signature::from_str(text.trim()).map_err(|e| corrupt(CURSOR_KEY, e))?)
            }
            None => None,
        };

        let leaves = match storage.load(LEAF_CACHE_KEY)? {
            Some(bytes) => {
                let stored: StoredLeaves =
                    serde_json::from_slice(&bytes).map_err(|e| corrupt(LEAF_CACHE_KEY, e))?;
                let mut leaves = BTreeMap::new();
                for (index, value) in stored.leaves {
                    let leaf = field::parse_decimal(&value)
                        .map_err(|e| corrupt(LEAF_CACHE_KEY, e))?;
                    leaves.insert(index, leaf);
                }
                leaves
            }
            None => BTreeMap::new(),
        };

        // a cursor without the leaves it vouches for is useless
        if leaves.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self { cursor, leaves })
    }

    pub fn persist<S: SecureStorage>(&self, storage: &S) -> Result<(), WalletError> {
        let stored = StoredLeaves {
            leaves: self
                .leaves
                .iter()
                .map(|(index, leaf)| (*index, field::to_decimal(leaf)))
                .collect(),
        };
        let bytes = serde_json::to_vec(&stored).map_err(|e| corrupt(LEAF_CACHE_KEY, e))?;
        storage.store(LEAF_CACHE_KEY, &bytes)?;

        match &self.cursor {
            Some(cursor) => storage.store(CURSOR_KEY, cursor.to_string().as_bytes())?,
            None => storage.remove(CURSOR_KEY)?,
        }
        Ok(())
    }
}

fn corrupt(key: &str, reason: impl ToString) -> StorageError {
    StorageError::Corrupt {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
