use log::{info, warn};
use rand::rngs::OsRng;
use shroud_privacy::Note;

use super::{OperationKind, OperationRecord, OperationStatus, ShieldReceipt, landed_index};
use crate::chain::ChainClient;
use crate::engine::{EngineState, ShieldedWallet};
use crate::error::WalletError;
use crate::ledger::PendingSubmission;
use crate::prover::{ProofTransport, ShieldInputs};
use crate::storage::SecureStorage;

impl<C: ChainClient, T: ProofTransport, S: SecureStorage> ShieldedWallet<C, T, S> {
    /// Deposit `amount` into a new note owned by this wallet
    pub async fn shield(&self, amount: u64) -> Result<ShieldReceipt, WalletError> {
        let mut state = self.state.lock().await;
        let mut record = OperationRecord::new(OperationKind::Shield);

        let result = self.shield_locked(&mut state, amount, &mut record).await;
        record.finish(&result);
        state.last_operation = Some(record);
        result
    }

    async fn shield_locked(
        &self,
        state: &mut EngineState,
        amount: u64,
        record: &mut OperationRecord,
    ) -> Result<ShieldReceipt, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount("cannot shield zero".into()));
        }
        self.ensure_fresh(state).await?;

        let note = Note::new(amount, self.identity.owner(), self.token_tag, &mut OsRng);

        // predicted placement, grounded in the tree account we just checked
        let mut predicted = state.tree.clone();
        let index = predicted.leaf_count();
        let new_root = predicted.insert(note.commitment)?;
        let path = predicted.prove_inclusion(index)?;
        let inputs = ShieldInputs::new(&note, index, &path, new_root)?;

        let mut parked = note.clone();
        parked.place(index, path.clone(), new_root);
        let pending = PendingSubmission::new(Vec::new(), vec![note.commitment], vec![parked]);

        record.advance(OperationStatus::Submitting);
        let (signature, logs) = self
            .submit_pool_instruction(state, &inputs.to_instruction(), None, pending, record)
            .await?;

        let landed = landed_index(&logs, index);
        let mut placed = note;
        if landed == index {
            placed.place(index, path, new_root);
        } else {
            warn!("Deposit landed at leaf {landed}, predicted {index}; regenerating its path");
            placed.leaf_index = Some(landed);
        }
        let commitment = placed.commitment;
        state.ledger.add_note(placed)?;
        state.ledger.persist(&self.storage)?;

        let report = self.sync_locked(state).await?;
        let note = state
            .ledger
            .find_by_commitment(&commitment)
            .cloned()
            .ok_or_else(|| {
                WalletError::ReconciliationMismatch(format!(
                    "deposit {signature} confirmed but its commitment is not in the tree"
                ))
            })?;

        info!("Shielded {amount} at leaf {landed} ({signature})");
        Ok(ShieldReceipt {
            signature,
            leaf_index: note.leaf_index.unwrap_or(landed),
            note,
            index_corrected: landed != index,
            root: report.root,
        })
    }
}
