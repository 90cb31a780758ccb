//! Shielded Notes
//!
//! A Note represents value held privately in the pool.
//!
//! ```text
//! Note = {
//!     amount: u64,        // Amount in the token's smallest unit
//!     owner: Fr,          // Owner identifier (Hash(spending_key))
//!     randomness: Fr,     // Blinding factor
//!     token_tag: Fr,      // Token the amount is denominated in
//!     commitment: Fr,     // Hash(amount, owner, randomness, token_tag)
//! }
//! ```
//!
//! Location data (leaf index, authentication path, root at creation) is
//! attached once the note has a place in the commitment tree.

use ark_ff::{PrimeField, Zero};
use ark_std::rand::Rng;
use serde::{Deserialize, Serialize};

use crate::field::{
    self, Fr, serde_decimal, serde_decimal_opt, serde_decimal_vec, serde_u64_string,
};
use crate::merkle::MerklePath;
use crate::nullifier::compute_nullifier;
use crate::poseidon;

/// Commitment to a note's contents
pub fn note_commitment(amount: u64, owner: &Fr, randomness: &Fr, token_tag: &Fr) -> Fr {
    poseidon::hash(&[Fr::from(amount), *owner, *randomness, *token_tag])
}

/// Commitment of the fixed dummy output used by withdrawals
///
/// `Hash(0, 0, 0, token_tag)`; it is a public input and never a tree leaf.
pub fn fixed_dummy_commitment(token_tag: &Fr) -> Fr {
    note_commitment(0, &Fr::zero(), &Fr::zero(), token_tag)
}

/// Map a 32-byte token identifier (e.g. a mint address) into the field
pub fn token_tag(token: &[u8; 32]) -> Fr {
    Fr::from_be_bytes_mod_order(token)
}

/// A shielded note representing privately held value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(with = "serde_u64_string")]
    pub amount: u64,
    #[serde(with = "serde_decimal")]
    pub owner: Fr,
    #[serde(with = "serde_decimal")]
    pub randomness: Fr,
    #[serde(with = "serde_decimal")]
    pub token_tag: Fr,
    #[serde(with = "serde_decimal")]
    pub commitment: Fr,
    /// Position in the commitment tree (None until placed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_decimal_vec")]
    pub merkle_path_siblings: Vec<Fr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merkle_path_directions: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_decimal_opt")]
    pub merkle_root_at_creation: Option<Fr>,
    /// Set only after reconciliation has seen the commitment at `leaf_index`
    #[serde(default)]
    pub confirmed_on_chain: bool,
}

impl Note {
    /// Create a new note with random blinding
    pub fn new<R: Rng + ?Sized>(amount: u64, owner: Fr, token_tag: Fr, rng: &mut R) -> Self {
        Self::with_randomness(amount, owner, field::random(rng), token_tag)
    }

    /// Create a note with explicit randomness (for recovery and import)
    pub fn with_randomness(amount: u64, owner: Fr, randomness: Fr, token_tag: Fr) -> Self {
        Self {
            amount,
            owner,
            randomness,
            token_tag,
            commitment: note_commitment(amount, &owner, &randomness, &token_tag),
            leaf_index: None,
            merkle_path_siblings: Vec::new(),
            merkle_path_directions: Vec::new(),
            merkle_root_at_creation: None,
            confirmed_on_chain: false,
        }
    }

    /// Zero-value padding input with fresh randomness
    ///
    /// Fresh randomness keeps the dummy nullifier unlinkable across
    /// transactions.
    pub fn dummy_input<R: Rng + ?Sized>(token_tag: Fr, rng: &mut R) -> Self {
        Self::new(0, Fr::zero(), token_tag, rng)
    }

    /// Hash the note contents
    pub fn recompute_commitment(&self) -> Fr {
        note_commitment(self.amount, &self.owner, &self.randomness, &self.token_tag)
    }

    /// Stored commitment matches the note contents
    pub fn is_well_formed(&self) -> bool {
        self.recompute_commitment() == self.commitment
    }

    /// Nullifier revealed when this note is spent
    pub fn nullifier(&self, nullifier_key: &Fr) -> Fr {
        compute_nullifier(&self.commitment, nullifier_key)
    }

    /// Attach the note's tree location
    pub fn place(&mut self, leaf_index: u64, path: MerklePath, root: Fr) {
        self.leaf_index = Some(leaf_index);
        self.merkle_path_siblings = path.siblings;
        self.merkle_path_directions = path.directions;
        self.merkle_root_at_creation = Some(root);
    }

    /// Stored authentication path, if complete
    pub fn path(&self) -> Option<MerklePath> {
        if self.merkle_path_siblings.is_empty()
            || self.merkle_path_siblings.len() != self.merkle_path_directions.len()
        {
            return None;
        }
        Some(MerklePath {
            siblings: self.merkle_path_siblings.clone(),
            directions: self.merkle_path_directions.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::MerkleTree;
    use ark_std::rand::{SeedableRng, rngs::StdRng};

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_commitment_invariant() {
        let mut rng = rng();
        let note = Note::new(100, Fr::from(5u64), Fr::from(9u64), &mut rng);
        assert!(note.is_well_formed());
        assert_eq!(
            note.commitment,
            poseidon::hash(&[Fr::from(100u64), note.owner, note.randomness, note.token_tag])
        );
    }

    #[test]
    fn test_tampered_note_is_corrupt() {
        let mut rng = rng();
        let mut note = Note::new(100, Fr::from(5u64), Fr::from(9u64), &mut rng);
        note.amount = 1_000;
        assert!(!note.is_well_formed());
    }

    #[test]
    fn test_dummy_inputs_differ() {
        let mut rng = rng();
        let tag = Fr::from(3u64);
        let a = Note::dummy_input(tag, &mut rng);
        let b = Note::dummy_input(tag, &mut rng);
        assert_eq!(a.amount, 0);
        assert!(a.owner.is_zero());
        assert_ne!(a.commitment, b.commitment);
        assert_ne!(a.nullifier(&Fr::zero()), b.nullifier(&Fr::zero()));
    }

    #[test]
    fn test_fixed_dummy_commitment() {
        let tag = Fr::from(3u64);
        assert_eq!(
            fixed_dummy_commitment(&tag),
            poseidon::hash(&[Fr::zero(), Fr::zero(), Fr::zero(), tag])
        );
    }

    #[test]
    fn test_persisted_json_shape() {
        let mut rng = rng();
        let mut note = Note::new(42, Fr::from(5u64), Fr::from(9u64), &mut rng);
        let tree = MerkleTree::from_leaves(3, &[note.commitment]).unwrap();
        note.place(0, tree.prove_inclusion(0).unwrap(), tree.root());

        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["amount"], "42");
        assert_eq!(json["owner"], "5");
        assert_eq!(json["tokenTag"], "9");
        assert_eq!(json["leafIndex"], 0);
        assert_eq!(json["merklePathSiblings"].as_array().unwrap().len(), 3);
        assert_eq!(json["confirmedOnChain"], false);

        let back: Note = serde_json::from_value(json).unwrap();
        assert_eq!(back, note);
        assert!(back.path().unwrap().verify(&back.commitment, &tree.root()));
    }

    #[test]
    fn test_unplaced_note_omits_location() {
        let mut rng = rng();
        let note = Note::new(1, Fr::from(5u64), Fr::from(9u64), &mut rng);
        let json = serde_json::to_value(&note).unwrap();
        assert!(json.get("leafIndex").is_none());
        assert!(json.get("merklePathSiblings").is_none());
        assert!(note.path().is_none());
    }
}
