//! Shield / Transfer / Unshield
//!
//! Every protocol run moves through the same states:
//!
//! ```text
//! Pending ──▶ GeneratingProof ──▶ Submitting ──▶ Confirmed
//!    │              │                  │
//!    └──────────────┴──────────────────┴──────▶ Failed(reason)
//! ```
//!
//! Shield has no proof and goes straight from `Pending` to `Submitting`.
//! Local notes change only after the chain confirms without error. When a
//! submission's outcome stays unknown its outputs are parked as a pending
//! submission and its inputs locked, for the next sync to settle.

mod shield;
mod transfer;
mod unshield;

use std::time::Duration;

use log::{debug, error, warn};
use shroud_privacy::{Fr, Note};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tokio::time::{Instant, sleep};

use crate::chain::instruction::{parse_leaf_log, with_compute_budget};
use crate::chain::{
    ChainClient, ChainError, Confirmation, PoolInstruction, RetryPolicy, retry_with_backoff,
};
use crate::engine::{EngineState, ShieldedWallet};
use crate::error::WalletError;
use crate::ledger::PendingSubmission;
use crate::prover::ProofTransport;
use crate::storage::SecureStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Shield,
    Transfer,
    Unshield,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    GeneratingProof,
    Submitting,
    Confirmed,
    Failed(String),
}

/// State of the most recent protocol run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub signature: Option<Signature>,
}

impl OperationRecord {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            status: OperationStatus::Pending,
            signature: None,
        }
    }

    pub(crate) fn advance(&mut self, status: OperationStatus) {
        debug!("{:?}: {:?} -> {:?}", self.kind, self.status, status);
        self.status = status;
    }

    /// Record the outcome; a confirmed run stays confirmed
    pub(crate) fn finish<T>(&mut self, result: &Result<T, WalletError>) {
        if let Err(e) = result {
            if self.status != OperationStatus::Confirmed {
                self.advance(OperationStatus::Failed(e.to_string()));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldReceipt {
    pub signature: Signature,
    pub note: Note,
    pub leaf_index: u64,
    /// The deposit landed at another index than predicted
    pub index_corrected: bool,
    pub root: Fr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub signature: Signature,
    pub payment_note: Note,
    /// Payment note encoded for the recipient
    pub payment_export: String,
    pub change_note: Option<Note>,
    pub nullifiers: [Fr; 2],
    /// Nullifier of the padding input, when one was needed
    pub dummy_nullifier: Option<Fr>,
    pub root: Fr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnshieldReceipt {
    pub signature: Signature,
    pub amount: u64,
    pub recipient: Pubkey,
    pub change_note: Option<Note>,
    pub nullifiers: [Fr; 2],
    pub dummy_nullifier: Option<Fr>,
    /// Public `Hash(0, 0, 0, token)` output
    pub dummy_commitment: Fr,
    pub root: Fr,
}

impl<C: ChainClient, T: ProofTransport, S: SecureStorage> ShieldedWallet<C, T, S> {
    /// Submit with the compute-budget prefix and wait for confirmation
    ///
    /// Once the chain has accepted the transaction, any outcome other than a
    /// confirmation or an on-chain failure leaves `pending` in the ledger.
    pub(crate) async fn submit_pool_instruction(
        &self,
        state: &mut EngineState,
        instruction: &PoolInstruction,
        recipient: Option<&Pubkey>,
        mut pending: PendingSubmission,
        record: &mut OperationRecord,
    ) -> Result<(Signature, Vec<String>), WalletError> {
        let payer = self.chain.payer();
        let bundle = with_compute_budget(
            instruction.to_instruction(&self.pool, &payer, recipient),
            self.config.submit.compute_unit_limit,
            self.config.submit.compute_unit_price,
        );

        let signature = self.chain.submit(bundle).await.map_err(submission_error)?;
        record.signature = Some(signature);
        debug!("Submitted {:?} as {signature}", record.kind);

        let confirmed = await_confirmation(
            &self.chain,
            &signature,
            self.config.confirm_timeout(),
            self.config.confirm_poll_interval(),
            &self.config.retry_policy(),
        )
        .await;

        match confirmed {
            Ok(logs) => {
                record.advance(OperationStatus::Confirmed);
                Ok((signature, logs))
            }
            Err(e @ WalletError::ChainSubmission(_)) => Err(e),
            Err(e) => {
                warn!("Outcome of {signature} unknown ({e}), holding it as pending");
                pending.signature = signature.to_string();
                state.ledger.add_pending(pending);
                state.trusted = false;
                if let Err(persist_err) = state.ledger.persist(&self.storage) {
                    error!("Failed to persist pending submission {signature}: {persist_err}");
                }
                Err(e)
            }
        }
    }
}

/// Poll until the transaction is final or `timeout` passes
pub async fn await_confirmation<C: ChainClient>(
    chain: &C,
    signature: &Signature,
    timeout: Duration,
    poll: Duration,
    retry: &RetryPolicy,
) -> Result<Vec<String>, WalletError> {
    let deadline = Instant::now() + timeout;

    loop {
        let status = retry_with_backoff(retry, "poll confirmation", || {
            chain.confirmation(signature)
        })
        .await?;

        match status {
            Some(Confirmation::Confirmed { logs, .. }) => return Ok(logs),
            Some(Confirmation::Failed { error }) => {
                return Err(WalletError::ChainSubmission(error));
            }
            None if Instant::now() >= deadline => {
                return Err(WalletError::ConfirmationTimeout {
                    signature: signature.to_string(),
                    timeout,
                });
            }
            None => sleep(poll).await,
        }
    }
}

/// Chain refusal as a submission failure, reason kept verbatim
pub(crate) fn submission_error(error: ChainError) -> WalletError {
    match error {
        ChainError::Rejected(reason) => WalletError::ChainSubmission(reason),
        ChainError::RateLimited => WalletError::Chain(error),
        other => WalletError::ChainSubmission(other.to_string()),
    }
}

/// First leaf index the program reported, or `expected` when it did not log one
pub(crate) fn landed_index(logs: &[String], expected: u64) -> u64 {
    match parse_leaf_log(logs) {
        Some((first, _)) => first,
        None => {
            warn!("Confirmed transaction carries no leaf log, assuming leaf {expected}");
            expected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::instruction::leaf_log;

    #[test]
    fn test_failed_status_not_applied_after_confirmation() {
        let mut record = OperationRecord::new(OperationKind::Shield);
        record.advance(OperationStatus::Confirmed);
        record.finish::<()>(&Err(WalletError::MissingLeaf { index: 1 }));
        assert_eq!(record.status, OperationStatus::Confirmed);

        let mut record = OperationRecord::new(OperationKind::Transfer);
        record.advance(OperationStatus::GeneratingProof);
        record.finish::<()>(&Err(WalletError::ProofGeneration("boom".into())));
        assert!(matches!(record.status, OperationStatus::Failed(ref m) if m.contains("boom")));
    }

    #[test]
    fn test_rejection_kept_verbatim() {
        let err = submission_error(ChainError::Rejected("unknown merkle root".into()));
        assert!(matches!(err, WalletError::ChainSubmission(ref m) if m == "unknown merkle root"));
        assert!(submission_error(ChainError::RateLimited).is_recoverable());
    }

    #[test]
    fn test_landed_index() {
        assert_eq!(landed_index(&[leaf_log(7, 2)], 3), 7);
        assert_eq!(landed_index(&["Program log: hello".to_string()], 3), 3);
    }
}
