//! Chain Seam
//!
//! Everything the engine needs from the settlement chain: account reads,
//! history with logs, submission and confirmation polling.
//!
//! ```text
//! ┌──────────────┐  account_data(tree)        ┌────────────────────┐
//! │              │ ─────────────────────────▶ │                    │
//! │    Engine    │  signatures / transaction  │   Pool program     │
//! │              │ ─────────────────────────▶ │   (tree, spent     │
//! │              │  submit / confirmation     │    set, vault)     │
//! └──────────────┘ ─────────────────────────▶ └────────────────────┘
//! ```

pub mod accounts;
pub mod instruction;
pub mod memory;
pub mod retry;

use std::future::Future;
use std::sync::Arc;

use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use thiserror::Error;

pub use accounts::{PoolAddresses, TreeAccount};
pub use instruction::PoolInstruction;
pub use memory::MemoryChain;
pub use retry::{RetryPolicy, retry_with_backoff};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("rate limited by rpc")]
    RateLimited,

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("account {0} not found")]
    AccountNotFound(Pubkey),

    #[error("invalid account data: {0}")]
    InvalidAccountData(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl ChainError {
    /// Worth retrying after a delay
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::RateLimited)
    }
}

/// One entry of an address's signature history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature: Signature,
    pub slot: u64,
    pub failed: bool,
}

/// Top-level instruction as recorded in history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstruction {
    pub program_id: Pubkey,
    pub data: Vec<u8>,
}

/// A confirmed transaction with its logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalTransaction {
    pub signature: Signature,
    pub slot: u64,
    pub instructions: Vec<RawInstruction>,
    pub logs: Vec<String>,
    pub failed: bool,
}

/// Final state of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed { slot: u64, logs: Vec<String> },
    Failed { error: String },
}

/// Read/write access to the settlement chain
pub trait ChainClient: Send + Sync {
    /// Fee payer and signer of every submission
    fn payer(&self) -> Pubkey;

    fn account_data(
        &self,
        address: &Pubkey,
    ) -> impl Future<Output = Result<Vec<u8>, ChainError>> + Send;

    /// Signatures touching `address`, newest first, strictly older than
    /// `before` and newer than `until`
    fn signatures(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SignatureInfo>, ChainError>> + Send;

    fn transaction(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<Option<HistoricalTransaction>, ChainError>> + Send;

    /// Sign with the payer and send
    fn submit(
        &self,
        instructions: Vec<Instruction>,
    ) -> impl Future<Output = Result<Signature, ChainError>> + Send;

    /// `None` while the transaction is not yet confirmed
    fn confirmation(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<Option<Confirmation>, ChainError>> + Send;
}

/// Several sessions may share one connection
impl<C: ChainClient> ChainClient for Arc<C> {
    fn payer(&self) -> Pubkey {
        (**self).payer()
    }

    fn account_data(
        &self,
        address: &Pubkey,
    ) -> impl Future<Output = Result<Vec<u8>, ChainError>> + Send {
        (**self).account_data(address)
    }

    fn signatures(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SignatureInfo>, ChainError>> + Send {
        (**self).signatures(address, before, until, limit)
    }

    fn transaction(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<Option<HistoricalTransaction>, ChainError>> + Send {
        (**self).transaction(signature)
    }

    fn submit(
        &self,
        instructions: Vec<Instruction>,
    ) -> impl Future<Output = Result<Signature, ChainError>> + Send {
        (**self).submit(instructions)
    }

    fn confirmation(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<Option<Confirmation>, ChainError>> + Send {
        (**self).confirmation(signature)
    }
}
