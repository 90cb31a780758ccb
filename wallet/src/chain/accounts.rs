//! Pool Account Layouts
//!
//! ```text
//! tree account:        [disc 8][root 32 BE][leaf_count u64 LE][depth u8]
//! nullifier account:   [disc 8][k u8][bit_count u32 LE][bits ...]
//! ```

use shroud_privacy::field::{self, Fr};
use shroud_privacy::SpentSet;
use solana_sdk::pubkey::Pubkey;

use super::ChainError;

pub const TREE_DISCRIMINATOR: [u8; 8] = *b"shrdtree";
pub const NULLIFIER_DISCRIMINATOR: [u8; 8] = *b"shrdnull";

pub const TREE_ACCOUNT_LEN: usize = 8 + 32 + 8 + 1;
const NULLIFIER_HEADER_LEN: usize = 8 + 1 + 4;

/// Program-derived accounts of one pool deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolAddresses {
    pub program_id: Pubkey,
    pub mint: Pubkey,
    pub tree: Pubkey,
    pub nullifiers: Pubkey,
    pub vault: Pubkey,
}

impl PoolAddresses {
    pub fn derive(program_id: Pubkey, mint: Pubkey) -> Self {
        let (tree, _) = Pubkey::find_program_address(&[b"tree", mint.as_ref()], &program_id);
        let (nullifiers, _) =
            Pubkey::find_program_address(&[b"nullifiers", mint.as_ref()], &program_id);
        let (vault, _) = Pubkey::find_program_address(&[b"vault", mint.as_ref()], &program_id);

        Self {
            program_id,
            mint,
            tree,
            nullifiers,
            vault,
        }
    }
}

/// Authority view of the commitment tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeAccount {
    pub root: Fr,
    pub leaf_count: u64,
    pub depth: u8,
}

impl TreeAccount {
    pub fn parse(data: &[u8]) -> Result<Self, ChainError> {
        if data.len() < TREE_ACCOUNT_LEN {
            return Err(ChainError::InvalidAccountData(format!(
                "tree account is {} bytes, expected {TREE_ACCOUNT_LEN}",
                data.len()
            )));
        }
        if data[..8] != TREE_DISCRIMINATOR {
            return Err(ChainError::InvalidAccountData(
                "tree account discriminator mismatch".into(),
            ));
        }

        let root = field::from_bytes_be(&read_array::<32>(data, 8))
            .map_err(|e| ChainError::InvalidAccountData(e.to_string()))?;
        let leaf_count = u64::from_le_bytes(read_array::<8>(data, 40));
        let depth = data[48];

        Ok(Self {
            root,
            leaf_count,
            depth,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(TREE_ACCOUNT_LEN);
        data.extend_from_slice(&TREE_DISCRIMINATOR);
        data.extend_from_slice(&field::to_bytes_be(&self.root));
        data.extend_from_slice(&self.leaf_count.to_le_bytes());
        data.push(self.depth);
        data
    }
}

/// Parse the published spent-nullifier bit array
pub fn parse_spent_set(data: &[u8]) -> Result<SpentSet, ChainError> {
    if data.len() < NULLIFIER_HEADER_LEN || data[..8] != NULLIFIER_DISCRIMINATOR {
        return Err(ChainError::InvalidAccountData(
            "nullifier account header mismatch".into(),
        ));
    }

    let num_hashes = data[8];
    let bit_count = u32::from_le_bytes(read_array::<4>(data, 9));
    SpentSet::from_bits(data[NULLIFIER_HEADER_LEN..].to_vec(), bit_count, num_hashes)
        .map_err(|e| ChainError::InvalidAccountData(e.to_string()))
}

pub fn encode_spent_set(set: &SpentSet) -> Vec<u8> {
    let mut data = Vec::with_capacity(NULLIFIER_HEADER_LEN + set.as_bytes().len());
    data.extend_from_slice(&NULLIFIER_DISCRIMINATOR);
    data.push(set.num_hashes());
    data.extend_from_slice(&set.bit_count().to_le_bytes());
    data.extend_from_slice(set.as_bytes());
    data
}

/// Caller guarantees `data.len() >= offset + N`
pub(crate) fn read_array<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[offset..offset + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_account_layout() {
        let account = TreeAccount {
            root: Fr::from(77u64),
            leaf_count: 0x0102,
            depth: 20,
        };
        let data = account.encode();
        assert_eq!(data.len(), TREE_ACCOUNT_LEN);
        assert_eq!(data[39], 77);
        assert_eq!(&data[40..42], &[0x02, 0x01]);
        assert_eq!(data[48], 20);
        assert_eq!(TreeAccount::parse(&data).unwrap(), account);
    }

    #[test]
    fn test_tree_account_rejects_garbage() {
        assert!(TreeAccount::parse(&[0u8; 10]).is_err());
        let mut data = TreeAccount {
            root: Fr::from(1u64),
            leaf_count: 1,
            depth: 3,
        }
        .encode();
        data[0] ^= 0xff;
        assert!(TreeAccount::parse(&data).is_err());
    }

    #[test]
    fn test_spent_set_account() {
        let mut set = SpentSet::new(256, 3).unwrap();
        set.insert(&Fr::from(5u64));
        let parsed = parse_spent_set(&encode_spent_set(&set)).unwrap();
        assert_eq!(parsed, set);
        assert!(parsed.might_be_spent(&Fr::from(5u64)));
    }

    #[test]
    fn test_pool_addresses_deterministic() {
        let program = Pubkey::new_from_array([1u8; 32]);
        let mint = Pubkey::new_from_array([2u8; 32]);
        let a = PoolAddresses::derive(program, mint);
        let b = PoolAddresses::derive(program, mint);
        assert_eq!(a, b);
        assert_ne!(a.tree, a.nullifiers);
        assert_ne!(a.tree, a.vault);
    }
}
