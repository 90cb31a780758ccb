//! Nullifiers
//!
//! Nullifier derivation for double-spend prevention.
//!
//! ```text
//! Nullifier = Hash(commitment, nullifier_key)
//! ```
//!
//! Once a nullifier is published, the corresponding note cannot be spent again.
//! Only the owner of the nullifier key can link a nullifier to its note.

use crate::field::Fr;
use crate::poseidon;

/// Derive the nullifier of the note committed to by `commitment`
pub fn compute_nullifier(commitment: &Fr, nullifier_key: &Fr) -> Fr {
    poseidon::hash(&[*commitment, *nullifier_key])
}
