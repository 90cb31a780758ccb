use log::info;
use rand::rngs::OsRng;
use shroud_privacy::{Fr, Note};

use super::{OperationKind, OperationRecord, OperationStatus, TransferReceipt, landed_index};
use crate::chain::ChainClient;
use crate::engine::{EngineState, ShieldedWallet};
use crate::error::WalletError;
use crate::export;
use crate::ledger::PendingSubmission;
use crate::prover::{ProofTransport, TransferInputs};
use crate::storage::SecureStorage;

impl<C: ChainClient, T: ProofTransport, S: SecureStorage> ShieldedWallet<C, T, S> {
    /// Pay `amount` privately to the holder of `recipient_owner`
    pub async fn transfer(
        &self,
        recipient_owner: Fr,
        amount: u64,
    ) -> Result<TransferReceipt, WalletError> {
        let mut state = self.state.lock().await;
        let mut record = OperationRecord::new(OperationKind::Transfer);

        let result = self
            .transfer_locked(&mut state, recipient_owner, amount, &mut record)
            .await;
        record.finish(&result);
        state.last_operation = Some(record);
        result
    }

    async fn transfer_locked(
        &self,
        state: &mut EngineState,
        recipient_owner: Fr,
        amount: u64,
        record: &mut OperationRecord,
    ) -> Result<TransferReceipt, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount("cannot transfer zero".into()));
        }
        self.ensure_fresh(state).await?;

        let spent = self.reconciler().spent_set().await?;
        let selection = self.select_locked(state, amount, &spent);
        if selection.is_empty() {
            return Err(WalletError::InsufficientBalance {
                requested: amount,
                available: self.available_locked(state, &spent),
            });
        }

        let inputs = self.spend_inputs(state, &selection)?;
        let owner = self.identity.owner();
        let payment = Note::new(amount, recipient_owner, self.token_tag, &mut OsRng);
        let change = Note::new(selection.total - amount, owner, self.token_tag, &mut OsRng);
        let circuit = TransferInputs::new(
            self.identity.spending_key(),
            state.tree.root(),
            inputs,
            [payment, change],
        )?;

        record.advance(OperationStatus::GeneratingProof);
        let proof = self.prover.prove(&circuit).await?;

        let mut next = state.tree.clone();
        let first = next.leaf_count();
        for commitment in &circuit.output_commitments {
            next.insert(*commitment)?;
        }

        let mut kept = Vec::with_capacity(2);
        for (offset, note) in circuit.outputs().iter().enumerate() {
            if note.owner == owner && note.amount > 0 {
                let mut parked = note.clone();
                parked.leaf_index = Some(first + offset as u64);
                kept.push(parked);
            }
        }
        let pending = PendingSubmission::new(
            selection.notes.iter().map(|n| n.commitment).collect(),
            circuit.output_commitments.to_vec(),
            kept,
        );

        record.advance(OperationStatus::Submitting);
        let instruction = circuit.to_instruction(proof, next.root());
        let (signature, logs) = self
            .submit_pool_instruction(state, &instruction, None, pending, record)
            .await?;
        let landed = landed_index(&logs, first);

        for spent_note in &selection.notes {
            state.ledger.remove_by_commitment(&spent_note.commitment);
        }

        let [mut payment, mut change] = circuit.outputs().clone();
        for (offset, note) in [&mut payment, &mut change].into_iter().enumerate() {
            let index = landed + offset as u64;
            if landed == first {
                note.place(index, next.prove_inclusion(index)?, next.root());
            } else {
                note.leaf_index = Some(index);
            }
        }
        if change.amount > 0 {
            state.ledger.add_note(change.clone())?;
        }
        if payment.owner == owner {
            state.ledger.add_note(payment.clone())?;
        }
        state.ledger.persist(&self.storage)?;

        let report = self.sync_locked(state).await?;
        let change_note = state.ledger.find_by_commitment(&change.commitment).cloned();
        let payment_note = state
            .ledger
            .find_by_commitment(&payment.commitment)
            .cloned()
            .unwrap_or(payment);

        info!("Transferred {amount} ({signature})");
        Ok(TransferReceipt {
            signature,
            payment_export: export::encode_note(&payment_note)?,
            payment_note,
            change_note,
            nullifiers: circuit.nullifiers,
            dummy_nullifier: Self::dummy_nullifier(&selection, &circuit.nullifiers),
            root: report.root,
        })
    }
}
