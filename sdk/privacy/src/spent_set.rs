//! Spent-Set Membership
//!
//! The pool publishes spent nullifiers into a fixed-size bit array using
//! `k` double-hashed positions per nullifier:
//!
//! ```text
//! h1  = u64_le(blake3(nullifier_be)[..8])
//! h2  = u64_le(blake3(nullifier_be || 0x01)[..8])
//! pos = (h1 + i * h2) mod 2^64 mod bit_count      for i in 0..k
//! ```
//!
//! A set bit at every position means "possibly spent" (false positives are
//! possible). Any unset bit means "definitely not spent".

use crate::error::PrivacyError;
use crate::field::{self, Fr};

/// Byte appended to the nullifier for the second hash
pub const SECOND_HASH_DOMAIN: u8 = 0x01;

/// Local copy of the on-chain spent-nullifier bit array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentSet {
    bits: Vec<u8>,
    bit_count: u32,
    num_hashes: u8,
}

impl SpentSet {
    /// Empty set with `bit_count` bits and `num_hashes` positions per entry
    pub fn new(bit_count: u32, num_hashes: u8) -> Result<Self, PrivacyError> {
        Self::from_bits(vec![0u8; bit_count.div_ceil(8) as usize], bit_count, num_hashes)
    }

    /// Wrap a bit array fetched from the chain
    pub fn from_bits(bits: Vec<u8>, bit_count: u32, num_hashes: u8) -> Result<Self, PrivacyError> {
        if bit_count == 0 {
            return Err(PrivacyError::InvalidSpentSet("bit count is zero".into()));
        }
        if num_hashes == 0 {
            return Err(PrivacyError::InvalidSpentSet("hash count is zero".into()));
        }
        let needed = bit_count.div_ceil(8) as usize;
        if bits.len() < needed {
            return Err(PrivacyError::InvalidSpentSet(format!(
                "{} bytes cannot hold {bit_count} bits",
                bits.len()
            )));
        }

        Ok(Self {
            bits,
            bit_count,
            num_hashes,
        })
    }

    pub fn bit_count(&self) -> u32 {
        self.bit_count
    }

    pub fn num_hashes(&self) -> u8 {
        self.num_hashes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Bit positions probed for `nullifier`
    pub fn bit_positions(&self, nullifier: &Fr) -> Vec<u32> {
        let (h1, h2) = double_hash(nullifier);
        (0..self.num_hashes as u64)
            .map(|i| {
                let combined = h1.wrapping_add(i.wrapping_mul(h2));
                (combined % self.bit_count as u64) as u32
            })
            .collect()
    }

    /// `false` means the nullifier has definitely not been published
    pub fn might_be_spent(&self, nullifier: &Fr) -> bool {
        let (h1, h2) = double_hash(nullifier);
        for i in 0..self.num_hashes as u64 {
            let position = (h1.wrapping_add(i.wrapping_mul(h2)) % self.bit_count as u64) as u32;
            if !self.bit(position) {
                return false;
            }
        }
        true
    }

    /// Record a nullifier (what the pool program does on spend)
    pub fn insert(&mut self, nullifier: &Fr) {
        for position in self.bit_positions(nullifier) {
            self.bits[(position / 8) as usize] |= 1 << (position % 8);
        }
    }

    fn bit(&self, position: u32) -> bool {
        self.bits[(position / 8) as usize] & (1 << (position % 8)) != 0
    }
}

fn double_hash(nullifier: &Fr) -> (u64, u64) {
    let bytes = field::to_bytes_be(nullifier);

    let h1 = blake3::hash(&bytes);

    let mut hasher = blake3::Hasher::new();
    hasher.update(&bytes);
    hasher.update(&[SECOND_HASH_DOMAIN]);
    let h2 = hasher.finalize();

    (first_u64(h1.as_bytes()), first_u64(h2.as_bytes()))
}

fn first_u64(digest: &[u8; 32]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(word)
}
