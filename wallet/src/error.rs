use std::time::Duration;

use shroud_privacy::PrivacyError;
use thiserror::Error;

use crate::chain::ChainError;
use crate::storage::StorageError;

/// Errors surfaced by the wallet engine
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("insufficient shielded balance: requested {requested}, spendable {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("nullifier collision: {0}")]
    NullifierCollision(String),

    #[error("ledger corruption: {0}")]
    LedgerCorruption(String),

    #[error("proof generation failed: {0}")]
    ProofGeneration(String),

    #[error("proof request {request_id} timed out after {timeout:?}")]
    ProofTimeout { request_id: String, timeout: Duration },

    #[error("chain submission failed: {0}")]
    ChainSubmission(String),

    #[error("transaction {signature} not confirmed within {timeout:?}")]
    ConfirmationTimeout { signature: String, timeout: Duration },

    #[error("reconciliation mismatch: {0}")]
    ReconciliationMismatch(String),

    #[error("no commitment could be attributed to leaf {index}")]
    MissingLeaf { index: u64 },

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Primitive(#[from] PrivacyError),
}

impl WalletError {
    /// Local failure that leaves the ledger usable as-is
    ///
    /// Non-recoverable errors mean local state was cleared or must not be
    /// trusted until the next successful sync.
    pub fn is_recoverable(&self) -> bool {
        match self {
            WalletError::InsufficientBalance { .. }
            | WalletError::InvalidAmount(_)
            | WalletError::NullifierCollision(_)
            | WalletError::ProofGeneration(_)
            | WalletError::ProofTimeout { .. }
            | WalletError::ChainSubmission(_)
            | WalletError::ConfirmationTimeout { .. }
            | WalletError::Import(_) => true,
            WalletError::Chain(e) => e.is_transient(),
            WalletError::Initialization(_)
            | WalletError::LedgerCorruption(_)
            | WalletError::ReconciliationMismatch(_)
            | WalletError::MissingLeaf { .. }
            | WalletError::Storage(_)
            | WalletError::Primitive(_) => false,
        }
    }
}

/// Reasons an exported note is refused on import
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("malformed note export: {0}")]
    Malformed(String),

    #[error("note commitment does not match its contents")]
    CommitmentMismatch,

    #[error("note is addressed to a different owner")]
    WrongOwner,

    #[error("note at leaf {leaf_index} is already in the ledger")]
    AlreadyPresent { leaf_index: u64 },

    #[error("note at leaf {leaf_index} is not on chain yet")]
    NotYetOnChain { leaf_index: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_messages_distinct() {
        let messages = [
            ImportError::CommitmentMismatch.to_string(),
            ImportError::WrongOwner.to_string(),
            ImportError::AlreadyPresent { leaf_index: 3 }.to_string(),
            ImportError::NotYetOnChain { leaf_index: 3 }.to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_recoverability() {
        assert!(
            WalletError::InsufficientBalance {
                requested: 5,
                available: 1
            }
            .is_recoverable()
        );
        assert!(WalletError::Chain(ChainError::RateLimited).is_recoverable());
        assert!(!WalletError::ReconciliationMismatch("count".into()).is_recoverable());
        assert!(!WalletError::MissingLeaf { index: 4 }.is_recoverable());
    }
}
