//! Shroud Privacy SDK
//!
//! Note-based privacy primitives for the shielded pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Shielded Transaction                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐ │
//! │  │  Nullifiers  │  │ Commitments  │  │   Merkle paths        │ │
//! │  │  (spent)     │  │  (new notes) │  │   (input inclusion)   │ │
//! │  └──────────────┘  └──────────────┘  └───────────────────────┘ │
//! │         │                 │                     │               │
//! │         ▼                 ▼                     ▼               │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              ZK Proof (Groth16 over BN254)               │   │
//! │  │  • Valid nullifier derivation                            │   │
//! │  │  • Valid commitment structure                            │   │
//! │  │  • Balance preservation: Σ inputs = Σ outputs            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod field;
pub mod keys;
pub mod merkle;
pub mod note;
pub mod nullifier;
pub mod poseidon;
pub mod spent_set;

pub use error::PrivacyError;
pub use field::Fr;
pub use keys::Identity;
pub use merkle::{DEFAULT_TREE_DEPTH, MAX_TREE_DEPTH, MerklePath, MerkleTree, empty_roots};
pub use note::{Note, fixed_dummy_commitment, note_commitment, token_tag};
pub use nullifier::compute_nullifier;
pub use spent_set::SpentSet;
