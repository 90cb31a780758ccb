//! Merkle Tree for Note Commitments
//!
//! Append-only sparse Merkle tree over note commitments. Only non-empty
//! nodes are stored; missing nodes fall back to the empty-subtree constant
//! of their level.
//!
//! ```text
//!                    Root
//!                   /    \
//!                 H01    H23
//!                /  \   /   \
//!               C0  C1 C2   e0        e0 = 0, e(l+1) = H(e(l), e(l))
//! ```
//!
//! The root is a pure function of the leaf sequence. Whenever the local leaf
//! list is suspect the tree is rebuilt with [`MerkleTree::from_leaves`],
//! never patched in place.

use ark_ff::Zero;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::PrivacyError;
use crate::field::{Fr, serde_decimal_vec};
use crate::poseidon;

/// Default tree depth (2^20 leaves)
pub const DEFAULT_TREE_DEPTH: usize = 20;

/// Largest depth the accumulator accepts
pub const MAX_TREE_DEPTH: usize = 32;

/// Empty-subtree roots for levels `0..=depth`
pub fn empty_roots(depth: usize) -> Vec<Fr> {
    let mut roots = Vec::with_capacity(depth + 1);
    let mut current = Fr::zero();
    roots.push(current);
    for _ in 0..depth {
        current = poseidon::hash_pair(&current, &current);
        roots.push(current);
    }
    roots
}

/// Authentication path from a leaf to the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerklePath {
    /// Sibling hashes from leaf level upwards
    #[serde(with = "serde_decimal_vec")]
    pub siblings: Vec<Fr>,
    /// 0 = current node is the left child, 1 = right child
    pub directions: Vec<u8>,
}

impl MerklePath {
    /// Fold `leaf` up the path
    pub fn compute_root(&self, leaf: &Fr) -> Fr {
        let mut current = *leaf;

        for (sibling, direction) in self.siblings.iter().zip(self.directions.iter()) {
            current = if *direction == 1 {
                poseidon::hash_pair(sibling, &current)
            } else {
                poseidon::hash_pair(&current, sibling)
            };
        }

        current
    }

    /// Check that this path proves inclusion of `leaf` under `root`
    pub fn verify(&self, leaf: &Fr, root: &Fr) -> bool {
        self.siblings.len() == self.directions.len()
            && self.directions.iter().all(|d| *d <= 1)
            && &self.compute_root(leaf) == root
    }

    /// Leaf index encoded by the direction bits
    pub fn leaf_index(&self) -> u64 {
        self.directions
            .iter()
            .enumerate()
            .fold(0u64, |acc, (level, d)| acc | ((*d as u64 & 1) << level))
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

/// Sparse, append-only Merkle accumulator
#[derive(Debug, Clone)]
pub struct MerkleTree {
    depth: usize,
    /// Non-empty nodes: (level, index) -> hash
    nodes: HashMap<(usize, u64), Fr>,
    empty: Vec<Fr>,
    leaf_count: u64,
    root: Fr,
}

impl MerkleTree {
    /// Create an empty tree of `depth` levels
    pub fn new(depth: usize) -> Result<Self, PrivacyError> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(PrivacyError::InvalidDepth(depth));
        }

        let empty = empty_roots(depth);
        let root = empty[depth];

        Ok(Self {
            depth,
            nodes: HashMap::new(),
            empty,
            leaf_count: 0,
            root,
        })
    }

    /// Rebuild a tree from an ordered leaf sequence
    pub fn from_leaves<'a, I>(depth: usize, leaves: I) -> Result<Self, PrivacyError>
    where
        I: IntoIterator<Item = &'a Fr>,
    {
        let mut tree = Self::new(depth)?;
        for leaf in leaves {
            tree.insert(*leaf)?;
        }
        Ok(tree)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Current root
    pub fn root(&self) -> Fr {
        self.root
    }

    /// Number of leaves appended so far (also the next leaf index)
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// Empty root of a tree with this depth
    pub fn empty_root(&self) -> Fr {
        self.empty[self.depth]
    }

    /// Append a leaf and return the new root
    pub fn insert(&mut self, leaf: Fr) -> Result<Fr, PrivacyError> {
        if self.leaf_count >= self.capacity() {
            return Err(PrivacyError::TreeFull { depth: self.depth });
        }

        let position = self.leaf_count;
        self.nodes.insert((0, position), leaf);

        let mut current_index = position;
        let mut current_hash = leaf;

        for level in 0..self.depth {
            let is_right = current_index & 1 == 1;
            let sibling = self.node(level, current_index ^ 1);

            let parent_hash = if is_right {
                poseidon::hash_pair(&sibling, &current_hash)
            } else {
                poseidon::hash_pair(&current_hash, &sibling)
            };

            current_index >>= 1;
            current_hash = parent_hash;
            self.nodes.insert((level + 1, current_index), parent_hash);
        }

        self.leaf_count += 1;
        self.root = current_hash;
        Ok(self.root)
    }

    /// Authentication path for the leaf at `index`
    pub fn prove_inclusion(&self, index: u64) -> Result<MerklePath, PrivacyError> {
        if index >= self.leaf_count {
            return Err(PrivacyError::LeafOutOfRange {
                index,
                count: self.leaf_count,
            });
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut directions = Vec::with_capacity(self.depth);
        let mut current_index = index;

        for level in 0..self.depth {
            directions.push((current_index & 1) as u8);
            siblings.push(self.node(level, current_index ^ 1));
            current_index >>= 1;
        }

        Ok(MerklePath {
            siblings,
            directions,
        })
    }

    /// Leaf stored at `index`
    pub fn get_leaf(&self, index: u64) -> Option<Fr> {
        if index >= self.leaf_count {
            return None;
        }
        self.nodes.get(&(0, index)).copied()
    }

    /// All leaves in insertion order
    pub fn leaves(&self) -> Vec<Fr> {
        (0..self.leaf_count)
            .filter_map(|i| self.nodes.get(&(0, i)).copied())
            .collect()
    }

    /// All-zero path of this depth, used for dummy inputs
    pub fn empty_path(&self) -> MerklePath {
        MerklePath {
            siblings: vec![Fr::zero(); self.depth],
            directions: vec![0; self.depth],
        }
    }

    fn node(&self, level: usize, index: u64) -> Fr {
        self.nodes
            .get(&(level, index))
            .copied()
            .unwrap_or(self.empty[level])
    }
}
