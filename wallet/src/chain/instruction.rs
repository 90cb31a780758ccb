//! Pool Instruction Codec
//!
//! One discriminator byte followed by fixed-offset fields. Field elements
//! are 32-byte big-endian, amounts are u64 little-endian.
//!
//! ```text
//! 0 Deposit   amount | commitment | new_root                                    (73 bytes)
//! 1 Transfer  proof | root | nullifier x2 | commitment x2 | new_root            (449 bytes)
//! 2 Withdraw  proof | root | nullifier x2 | change | dummy | amount | new_root  (457 bytes)
//! ```
//!
//! The pool program logs `SHROUD_LEAF:<first_index>:<count>` for every
//! instruction that appends leaves.

use shroud_privacy::field::{self, Fr};
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use super::ChainError;
use super::accounts::{PoolAddresses, read_array};
use crate::prover::proof::{Groth16Proof, PROOF_LEN};

pub const DEPOSIT_TAG: u8 = 0;
pub const TRANSFER_TAG: u8 = 1;
pub const WITHDRAW_TAG: u8 = 2;

pub const DEPOSIT_LEN: usize = 1 + 8 + 32 + 32;
pub const TRANSFER_LEN: usize = 1 + PROOF_LEN + 32 + 64 + 64 + 32;
pub const WITHDRAW_LEN: usize = 1 + PROOF_LEN + 32 + 64 + 32 + 32 + 8 + 32;

pub const LEAF_LOG_PREFIX: &str = "Program log: SHROUD_LEAF:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolInstruction {
    Deposit {
        amount: u64,
        commitment: Fr,
        new_root: Fr,
    },
    Transfer {
        proof: Groth16Proof,
        root: Fr,
        nullifiers: [Fr; 2],
        commitments: [Fr; 2],
        new_root: Fr,
    },
    Withdraw {
        proof: Groth16Proof,
        root: Fr,
        nullifiers: [Fr; 2],
        change_commitment: Fr,
        dummy_commitment: Fr,
        amount: u64,
        new_root: Fr,
    },
}

impl PoolInstruction {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            PoolInstruction::Deposit {
                amount,
                commitment,
                new_root,
            } => {
                let mut data = Vec::with_capacity(DEPOSIT_LEN);
                data.push(DEPOSIT_TAG);
                data.extend_from_slice(&amount.to_le_bytes());
                data.extend_from_slice(&field::to_bytes_be(commitment));
                data.extend_from_slice(&field::to_bytes_be(new_root));
                data
            }
            PoolInstruction::Transfer {
                proof,
                root,
                nullifiers,
                commitments,
                new_root,
            } => {
                let mut data = Vec::with_capacity(TRANSFER_LEN);
                data.push(TRANSFER_TAG);
                data.extend_from_slice(&proof.to_bytes());
                data.extend_from_slice(&field::to_bytes_be(root));
                for n in nullifiers {
                    data.extend_from_slice(&field::to_bytes_be(n));
                }
                for c in commitments {
                    data.extend_from_slice(&field::to_bytes_be(c));
                }
                data.extend_from_slice(&field::to_bytes_be(new_root));
                data
            }
            PoolInstruction::Withdraw {
                proof,
                root,
                nullifiers,
                change_commitment,
                dummy_commitment,
                amount,
                new_root,
            } => {
                let mut data = Vec::with_capacity(WITHDRAW_LEN);
                data.push(WITHDRAW_TAG);
                data.extend_from_slice(&proof.to_bytes());
                data.extend_from_slice(&field::to_bytes_be(root));
                for n in nullifiers {
                    data.extend_from_slice(&field::to_bytes_be(n));
                }
                data.extend_from_slice(&field::to_bytes_be(change_commitment));
                data.extend_from_slice(&field::to_bytes_be(dummy_commitment));
                data.extend_from_slice(&amount.to_le_bytes());
                data.extend_from_slice(&field::to_bytes_be(new_root));
                data
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, ChainError> {
        let Some((&tag, _)) = data.split_first() else {
            return Err(invalid("empty instruction data"));
        };

        match tag {
            DEPOSIT_TAG => {
                expect_len(data, DEPOSIT_LEN, "deposit")?;
                Ok(PoolInstruction::Deposit {
                    amount: u64::from_le_bytes(read_array::<8>(data, 1)),
                    commitment: read_field(data, 9)?,
                    new_root: read_field(data, 41)?,
                })
            }
            TRANSFER_TAG => {
                expect_len(data, TRANSFER_LEN, "transfer")?;
                let mut offset = 1 + PROOF_LEN;
                let root = read_field(data, offset)?;
                offset += 32;
                let nullifiers = [read_field(data, offset)?, read_field(data, offset + 32)?];
                offset += 64;
                let commitments = [read_field(data, offset)?, read_field(data, offset + 32)?];
                offset += 64;
                Ok(PoolInstruction::Transfer {
                    proof: read_proof(data)?,
                    root,
                    nullifiers,
                    commitments,
                    new_root: read_field(data, offset)?,
                })
            }
            WITHDRAW_TAG => {
                expect_len(data, WITHDRAW_LEN, "withdraw")?;
                let mut offset = 1 + PROOF_LEN;
                let root = read_field(data, offset)?;
                offset += 32;
                let nullifiers = [read_field(data, offset)?, read_field(data, offset + 32)?];
                offset += 64;
                let change_commitment = read_field(data, offset)?;
                offset += 32;
                let dummy_commitment = read_field(data, offset)?;
                offset += 32;
                let amount = u64::from_le_bytes(read_array::<8>(data, offset));
                offset += 8;
                Ok(PoolInstruction::Withdraw {
                    proof: read_proof(data)?,
                    root,
                    nullifiers,
                    change_commitment,
                    dummy_commitment,
                    amount,
                    new_root: read_field(data, offset)?,
                })
            }
            other => Err(invalid(&format!("unknown instruction tag {other}"))),
        }
    }

    /// Commitments this instruction appends to the tree, in order
    pub fn leaves_appended(&self) -> Vec<Fr> {
        match self {
            PoolInstruction::Deposit { commitment, .. } => vec![*commitment],
            PoolInstruction::Transfer { commitments, .. } => commitments.to_vec(),
            PoolInstruction::Withdraw {
                change_commitment, ..
            } => vec![*change_commitment],
        }
    }

    pub fn nullifiers(&self) -> &[Fr] {
        match self {
            PoolInstruction::Deposit { .. } => &[],
            PoolInstruction::Transfer { nullifiers, .. }
            | PoolInstruction::Withdraw { nullifiers, .. } => nullifiers.as_slice(),
        }
    }

    pub fn new_root(&self) -> Fr {
        match self {
            PoolInstruction::Deposit { new_root, .. }
            | PoolInstruction::Transfer { new_root, .. }
            | PoolInstruction::Withdraw { new_root, .. } => *new_root,
        }
    }

    /// Build the program instruction with its account list
    pub fn to_instruction(
        &self,
        pool: &PoolAddresses,
        payer: &Pubkey,
        recipient: Option<&Pubkey>,
    ) -> Instruction {
        let mut accounts = vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(pool.tree, false),
        ];
        match self {
            PoolInstruction::Deposit { .. } => {
                accounts.push(AccountMeta::new(pool.vault, false));
            }
            PoolInstruction::Transfer { .. } => {
                accounts.push(AccountMeta::new(pool.nullifiers, false));
            }
            PoolInstruction::Withdraw { .. } => {
                accounts.push(AccountMeta::new(pool.nullifiers, false));
                accounts.push(AccountMeta::new(pool.vault, false));
                if let Some(recipient) = recipient {
                    accounts.push(AccountMeta::new(*recipient, false));
                }
            }
        }

        Instruction::new_with_bytes(pool.program_id, &self.encode(), accounts)
    }
}

/// Compute-budget prefix followed by the pool instruction
pub fn with_compute_budget(
    instruction: Instruction,
    unit_limit: u32,
    unit_price: u64,
) -> Vec<Instruction> {
    vec![
        ComputeBudgetInstruction::set_compute_unit_limit(unit_limit),
        ComputeBudgetInstruction::set_compute_unit_price(unit_price),
        instruction,
    ]
}

/// Parses format: "Program log: SHROUD_LEAF:<first>:<count>"
pub fn parse_leaf_log(logs: &[String]) -> Option<(u64, u64)> {
    logs.iter().find_map(|log| {
        let payload = log.strip_prefix(LEAF_LOG_PREFIX)?;
        let (first, count) = payload.split_once(':')?;
        Some((first.trim().parse().ok()?, count.trim().parse().ok()?))
    })
}

pub fn leaf_log(first: u64, count: u64) -> String {
    format!("{LEAF_LOG_PREFIX}{first}:{count}")
}

fn expect_len(data: &[u8], expected: usize, kind: &str) -> Result<(), ChainError> {
    if data.len() != expected {
        return Err(invalid(&format!(
            "{kind} payload is {} bytes, expected {expected}",
            data.len()
        )));
    }
    Ok(())
}

fn read_field(data: &[u8], offset: usize) -> Result<Fr, ChainError> {
    field::from_bytes_be(&read_array::<32>(data, offset)).map_err(|e| invalid(&e.to_string()))
}

fn read_proof(data: &[u8]) -> Result<Groth16Proof, ChainError> {
    Groth16Proof::from_bytes(&data[1..1 + PROOF_LEN]).ok_or_else(|| invalid("proof length"))
}

fn invalid(reason: &str) -> ChainError {
    ChainError::InvalidAccountData(format!("pool instruction: {reason}"))
}
