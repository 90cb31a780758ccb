use log::info;
use rand::rngs::OsRng;
use shroud_privacy::Note;
use solana_sdk::pubkey::Pubkey;

use super::{OperationKind, OperationRecord, OperationStatus, UnshieldReceipt, landed_index};
use crate::chain::ChainClient;
use crate::engine::{EngineState, ShieldedWallet};
use crate::error::WalletError;
use crate::ledger::PendingSubmission;
use crate::prover::{ProofTransport, UnshieldInputs};
use crate::storage::SecureStorage;

impl<C: ChainClient, T: ProofTransport, S: SecureStorage> ShieldedWallet<C, T, S> {
    /// Withdraw `amount` in the clear to `recipient`
    pub async fn unshield(
        &self,
        recipient: Pubkey,
        amount: u64,
    ) -> Result<UnshieldReceipt, WalletError> {
        let mut state = self.state.lock().await;
        let mut record = OperationRecord::new(OperationKind::Unshield);

        let result = self
            .unshield_locked(&mut state, recipient, amount, &mut record)
            .await;
        record.finish(&result);
        state.last_operation = Some(record);
        result
    }

    async fn unshield_locked(
        &self,
        state: &mut EngineState,
        recipient: Pubkey,
        amount: u64,
        record: &mut OperationRecord,
    ) -> Result<UnshieldReceipt, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount("cannot unshield zero".into()));
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
        let change = Note::new(
            selection.total - amount,
            self.identity.owner(),
            self.token_tag,
            &mut OsRng,
        );
        let circuit = UnshieldInputs::new(
            self.identity.spending_key(),
            state.tree.root(),
            inputs,
            change,
            amount,
            recipient,
        )?;

        record.advance(OperationStatus::GeneratingProof);
        let proof = self.prover.prove(&circuit).await?;

        // the fixed dummy output is a public input only; the change is the sole new leaf
        let mut next = state.tree.clone();
        let predicted = next.leaf_count();
        next.insert(circuit.change_commitment)?;

        let mut kept = Vec::new();
        if circuit.change().amount > 0 {
            let mut parked = circuit.change().clone();
            parked.leaf_index = Some(predicted);
            kept.push(parked);
        }
        let pending = PendingSubmission::new(
            selection.notes.iter().map(|n| n.commitment).collect(),
            vec![circuit.change_commitment],
            kept,
        );

        record.advance(OperationStatus::Submitting);
        let instruction = circuit.to_instruction(proof, next.root());
        let (signature, logs) = self
            .submit_pool_instruction(state, &instruction, Some(&recipient), pending, record)
            .await?;
        let landed = landed_index(&logs, predicted);

        for spent_note in &selection.notes {
            state.ledger.remove_by_commitment(&spent_note.commitment);
        }

        let mut change = circuit.change().clone();
        if change.amount > 0 {
            if landed == predicted {
                change.place(landed, next.prove_inclusion(landed)?, next.root());
            } else {
                change.leaf_index = Some(landed);
            }
            state.ledger.add_note(change.clone())?;
        }
        state.ledger.persist(&self.storage)?;

        let report = self.sync_locked(state).await?;
        let change_note = state.ledger.find_by_commitment(&change.commitment).cloned();

        info!("Unshielded {amount} to {recipient} ({signature})");
        Ok(UnshieldReceipt {
            signature,
            amount,
            recipient,
            change_note,
            nullifiers: circuit.nullifiers,
            dummy_nullifier: Self::dummy_nullifier(&selection, &circuit.nullifiers),
            dummy_commitment: circuit.dummy_commitment,
            root: report.root,
        })
    }
}
