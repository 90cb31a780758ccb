//! Key Derivation
//!
//! One identity per seed, derived deterministically:
//!
//! ```text
//! spending_key = blake3::derive_key("shroud spending key v1", seed)  (mod r)
//! owner        = Hash(spending_key)
//! viewing_key  = bytes_be(owner)
//! ```
//!
//! The owner identifier is what other parties put into notes addressed to
//! this wallet. The spending key never leaves the process.

use std::fmt;

use ark_ff::PrimeField;

use crate::error::PrivacyError;
use crate::field::{self, Fr};
use crate::poseidon;

const SPENDING_KEY_CONTEXT: &str = "shroud spending key v1";

/// Wallet identity derived from a seed
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    spending_key: Fr,
    owner: Fr,
    viewing_key: [u8; 32],
}

impl Identity {
    /// Derive the identity for `seed`
    pub fn from_seed(seed: &[u8]) -> Result<Self, PrivacyError> {
        if seed.is_empty() {
            return Err(PrivacyError::EmptySeed);
        }

        let derived = blake3::derive_key(SPENDING_KEY_CONTEXT, seed);
        let spending_key = Fr::from_be_bytes_mod_order(&derived);
        let owner = poseidon::hash(&[spending_key]);
        let viewing_key = field::to_bytes_be(&owner);

        Ok(Self {
            spending_key,
            owner,
            viewing_key,
        })
    }

    /// Public owner identifier placed in notes addressed to this identity
    pub fn owner(&self) -> Fr {
        self.owner
    }

    /// Viewing key bytes (big-endian owner identifier)
    pub fn viewing_key(&self) -> &[u8; 32] {
        &self.viewing_key
    }

    /// Key used to derive nullifiers for notes owned by this identity
    pub fn nullifier_key(&self) -> Fr {
        self.spending_key
    }

    /// Secret spending key, handed to the prover as a private input only
    pub fn spending_key(&self) -> Fr {
        self.spending_key
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("spending_key", &"<redacted>")
            .field("owner", &field::to_decimal(&self.owner))
            .finish()
    }
}
