//! Shroud Wallet
//!
//! Client-side engine of a shielded pool: keeps the private note ledger,
//! mirrors the pool's commitment tree, drives shield / transfer / unshield,
//! and reconciles local state with the chain's history.
//!
//! ```text
//!            ┌─────────────────────────── ShieldedWallet ─────────────────────────┐
//!            │                                                                    │
//!  seed ───▶ │  Identity ──▶ NoteLedger ◀── sync::Reconciler ◀── HistoryScanner  │
//!            │                  │                  │                  │          │
//!            │                  ▼                  ▼                  │          │
//!            │            protocol::{shield, transfer, unshield}      │          │
//!            │                  │                                     │          │
//!            └──────────────────┼─────────────────────────────────────┼──────────┘
//!                               │ prover::ProverClient                │ chain::ChainClient
//!                               ▼                                     ▼
//!                        external prover                     settlement chain
//! ```

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod ledger;
pub mod protocol;
pub mod prover;
pub mod storage;
pub mod sync;

pub use chain::{ChainClient, ChainError, MemoryChain, PoolAddresses};
pub use config::WalletConfig;
pub use engine::ShieldedWallet;
pub use error::{ImportError, WalletError};
pub use ledger::{NoteLedger, PendingSubmission, Selection};
pub use protocol::{
    OperationKind, OperationRecord, OperationStatus, ShieldReceipt, TransferReceipt,
    UnshieldReceipt,
};
pub use prover::{MockMode, MockProofTransport, ProofTransport, ProverClient};
pub use storage::{EncryptedFileStorage, MemoryStorage, SecureStorage};
pub use sync::{SyncOutcome, SyncReport};
