//! Note Ledger
//!
//! The wallet's private list of notes, persisted as JSON in secure storage.
//!
//! ```text
//! storage["notes"] = [
//!   { "amount": "5", "owner": "…", "randomness": "…", "tokenTag": "…",
//!     "commitment": "…", "leafIndex": 3, "merklePathSiblings": [...],
//!     "merklePathDirections": [...], "merkleRootAtCreation": "…",
//!     "confirmedOnChain": true },
//!   ...
//! ]
//! ```
//!
//! A leaf index identifies at most one note. Spendable notes are the
//! confirmed ones whose commitment still matches their contents and that no
//! pending submission spends.
//!
//! A submission whose outcome never became known is kept under its own key
//! with the openings of its outputs, until a sync sees it land or fail.

use std::collections::HashSet;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use shroud_privacy::Note;
use shroud_privacy::field::{self, Fr};

use crate::error::WalletError;
use crate::storage::{SecureStorage, StorageError};

pub const NOTES_KEY: &str = "notes";
pub const PENDING_KEY: &str = "pending_submissions";

/// A submitted transaction not yet seen confirmed or failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    pub signature: String,
    /// Ledger notes the transaction spends; locked while it is pending
    #[serde(with = "field::serde_decimal_vec")]
    pub inputs: Vec<Fr>,
    /// Every commitment the transaction appends to the tree
    #[serde(with = "field::serde_decimal_vec")]
    pub appended: Vec<Fr>,
    /// Outputs this wallet keeps once the transaction lands
    pub outputs: Vec<Note>,
}

impl PendingSubmission {
    pub fn new(inputs: Vec<Fr>, appended: Vec<Fr>, outputs: Vec<Note>) -> Self {
        Self {
            signature: String::new(),
            inputs,
            appended,
            outputs,
        }
    }
}

/// Notes chosen to cover an amount
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub notes: Vec<Note>,
    pub total: u64,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct NoteLedger {
    owner: Fr,
    notes: Vec<Note>,
    pending: Vec<PendingSubmission>,
}

impl NoteLedger {
    pub fn new(owner: Fr) -> Self {
        Self {
            owner,
            notes: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Load the persisted list and clean it
    ///
    /// Notes of another owner, notes without a leaf index and later notes
    /// claiming an already-used leaf index are dropped. The cleaned list is
    /// written back when anything was removed.
    pub fn load<S: SecureStorage>(storage: &S, owner: Fr) -> Result<Self, WalletError> {
        let pending = match storage.load(PENDING_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                key: PENDING_KEY.to_string(),
                reason: e.to_string(),
            })?,
            None => Vec::new(),
        };
        let Some(bytes) = storage.load(NOTES_KEY)? else {
            return Ok(Self {
                pending,
                ..Self::new(owner)
            });
        };

        let stored: Vec<Note> =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                key: NOTES_KEY.to_string(),
                reason: e.to_string(),
            })?;
        let stored_len = stored.len();

        let mut seen = HashSet::new();
        let mut notes = Vec::with_capacity(stored_len);
        for note in stored {
            if note.owner != owner {
                warn!("Dropping stored note {} of another owner", short(&note.commitment));
                continue;
            }
            let Some(index) = note.leaf_index else {
                warn!("Dropping stored note {} without a leaf index", short(&note.commitment));
                continue;
            };
            if !seen.insert(index) {
                warn!("Dropping duplicate stored note at leaf {index}");
                continue;
            }
            notes.push(note);
        }

        let ledger = Self {
            owner,
            notes,
            pending,
        };
        if ledger.notes.len() != stored_len {
            info!(
                "Cleaned note ledger: kept {} of {stored_len} stored notes",
                ledger.notes.len()
            );
            ledger.persist(storage)?;
        }
        Ok(ledger)
    }

    pub fn persist<S: SecureStorage>(&self, storage: &S) -> Result<(), WalletError> {
        let bytes = serde_json::to_vec(&self.notes).map_err(|e| StorageError::Corrupt {
            key: NOTES_KEY.to_string(),
            reason: e.to_string(),
        })?;
        storage.store(NOTES_KEY, &bytes)?;

        if self.pending.is_empty() {
            storage.remove(PENDING_KEY)?;
        } else {
            let bytes = serde_json::to_vec(&self.pending).map_err(|e| StorageError::Corrupt {
                key: PENDING_KEY.to_string(),
                reason: e.to_string(),
            })?;
            storage.store(PENDING_KEY, &bytes)?;
        }
        Ok(())
    }

    pub fn owner(&self) -> &Fr {
        &self.owner
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub(crate) fn notes_mut(&mut self) -> &mut Vec<Note> {
        &mut self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, leaf_index: u64) -> Option<&Note> {
        self.notes.iter().find(|n| n.leaf_index == Some(leaf_index))
    }

    pub fn find_by_commitment(&self, commitment: &Fr) -> Option<&Note> {
        self.notes.iter().find(|n| n.commitment == *commitment)
    }

    /// Add a placed note
    ///
    /// Returns `false` when the note has no leaf index or the same note is
    /// already held at that index.
    pub fn add_note(&mut self, note: Note) -> Result<bool, WalletError> {
        let Some(index) = note.leaf_index else {
            warn!("Refusing note {} without a leaf index", short(&note.commitment));
            return Ok(false);
        };

        if let Some(existing) = self.get(index) {
            if existing.commitment == note.commitment {
                return Ok(false);
            }
            return Err(WalletError::LedgerCorruption(format!(
                "leaf {index} already holds note {}, refusing {}",
                short(&existing.commitment),
                short(&note.commitment)
            )));
        }

        self.notes.push(note);
        Ok(true)
    }

    pub fn remove_by_commitment(&mut self, commitment: &Fr) -> Option<Note> {
        let position = self.notes.iter().position(|n| n.commitment == *commitment)?;
        Some(self.notes.remove(position))
    }

    /// Mark every note unconfirmed until the next matching sync
    pub fn demote_all(&mut self) {
        for note in &mut self.notes {
            note.confirmed_on_chain = false;
        }
    }

    pub fn pending(&self) -> &[PendingSubmission] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn add_pending(&mut self, pending: PendingSubmission) {
        self.pending.push(pending);
    }

    /// The pending transaction landed: its inputs are gone and its outputs
    /// join the ledger at the indices the tree gave them
    pub fn settle_pending(&mut self, signature: &str, index_of: impl Fn(&Fr) -> Option<u64>) {
        let Some(position) = self.pending.iter().position(|p| p.signature == signature) else {
            return;
        };
        let pending = self.pending.remove(position);
        for input in &pending.inputs {
            self.remove_by_commitment(input);
        }
        for mut output in pending.outputs {
            if output.owner != self.owner || self.find_by_commitment(&output.commitment).is_some() {
                continue;
            }
            if let Some(index) = index_of(&output.commitment) {
                output.leaf_index = Some(index);
            }
            self.notes.push(output);
        }
    }

    /// The pending transaction failed: its inputs are spendable again
    pub fn release_pending(&mut self, signature: &str) {
        self.pending.retain(|p| p.signature != signature);
    }

    fn is_locked(&self, commitment: &Fr) -> bool {
        self.pending.iter().any(|p| p.inputs.contains(commitment))
    }

    /// Notes that may be used as proof inputs
    pub fn spendable(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(move |n| {
            n.confirmed_on_chain
                && n.leaf_index.is_some()
                && n.is_well_formed()
                && !self.is_locked(&n.commitment)
        })
    }

    pub fn balance(&self) -> u64 {
        self.spendable()
            .fold(0u64, |acc, n| acc.saturating_add(n.amount))
    }

    /// Pick at most two spendable notes covering `target`
    ///
    /// Largest notes first. When the two largest cannot cover the target the
    /// selection is empty with a total of zero.
    pub fn select(&self, target: u64, excluded: impl Fn(&Note) -> bool) -> Selection {
        let mut candidates: Vec<&Note> = self.spendable().filter(|n| !excluded(n)).collect();
        candidates.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut selection = Selection::default();
        for note in candidates.into_iter().take(2) {
            if selection.total >= target && !selection.notes.is_empty() {
                break;
            }
            selection.total = selection.total.saturating_add(note.amount);
            selection.notes.push(note.clone());
        }

        if selection.total < target || selection.notes.is_empty() {
            return Selection::default();
        }
        selection
    }
}

/// Leading digits of a field element for log lines
pub(crate) fn short(value: &Fr) -> String {
    let mut decimal = shroud_privacy::field::to_decimal(value);
    decimal.truncate(12);
    decimal
}
