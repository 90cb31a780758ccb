//! Typed circuit inputs
//!
//! Each protocol builds its own input struct. Construction runs the same
//! checks the circuit enforces so a doomed proof is never requested. The
//! flat string map the prover consumes is produced only at the boundary.

use std::collections::BTreeMap;

use ark_ff::Zero;
use serde::{Deserialize, Serialize};
use shroud_privacy::field::{self, Fr};
use shroud_privacy::note::{fixed_dummy_commitment, token_tag};
use shroud_privacy::{MerklePath, Note, compute_nullifier, poseidon};
use solana_sdk::pubkey::Pubkey;

use crate::chain::PoolInstruction;
use crate::error::WalletError;

/// Value in the prover's input map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProverValue {
    Scalar(String),
    Array(Vec<String>),
}

impl ProverValue {
    fn field(value: &Fr) -> Self {
        ProverValue::Scalar(field::to_decimal(value))
    }

    fn fields<'a>(values: impl IntoIterator<Item = &'a Fr>) -> Self {
        ProverValue::Array(values.into_iter().map(field::to_decimal).collect())
    }

    fn numbers(values: impl IntoIterator<Item = u64>) -> Self {
        ProverValue::Array(values.into_iter().map(|v| v.to_string()).collect())
    }
}

/// Inputs of a circuit the prover knows by name
pub trait CircuitInputs: Send + Sync {
    const CIRCUIT: &'static str;

    fn to_prover_map(&self) -> BTreeMap<String, ProverValue>;
}

/// A note being spent together with its authentication path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendInput {
    pub note: Note,
    pub path: MerklePath,
    pub is_dummy: bool,
}

impl SpendInput {
    pub fn real(note: Note, path: MerklePath) -> Self {
        Self {
            note,
            path,
            is_dummy: false,
        }
    }

    pub fn dummy(note: Note, path: MerklePath) -> Self {
        Self {
            note,
            path,
            is_dummy: true,
        }
    }
}

// ============================================================================
// Shield
// ============================================================================

/// Public data of a deposit (no proof is needed)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldInputs {
    pub amount: u64,
    pub commitment: Fr,
    pub leaf_index: u64,
    pub new_root: Fr,
}

impl ShieldInputs {
    pub fn new(
        note: &Note,
        leaf_index: u64,
        path: &MerklePath,
        new_root: Fr,
    ) -> Result<Self, WalletError> {
        if note.amount == 0 {
            return Err(WalletError::InvalidAmount("cannot shield zero".into()));
        }
        if !note.is_well_formed() {
            return Err(constraint("deposit commitment does not match note contents"));
        }
        if path.leaf_index() != leaf_index || !path.verify(&note.commitment, &new_root) {
            return Err(constraint("deposit path does not reach the new root"));
        }

        Ok(Self {
            amount: note.amount,
            commitment: note.commitment,
            leaf_index,
            new_root,
        })
    }

    pub fn to_instruction(&self) -> PoolInstruction {
        PoolInstruction::Deposit {
            amount: self.amount,
            commitment: self.commitment,
            new_root: self.new_root,
        }
    }
}

// ============================================================================
// Transfer
// ============================================================================

/// Two-in, two-out private transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInputs {
    pub root: Fr,
    pub token_tag: Fr,
    pub nullifiers: [Fr; 2],
    pub output_commitments: [Fr; 2],
    spending_key: Fr,
    inputs: [SpendInput; 2],
    outputs: [Note; 2],
}

impl TransferInputs {
    pub fn new(
        spending_key: Fr,
        root: Fr,
        inputs: [SpendInput; 2],
        outputs: [Note; 2],
    ) -> Result<Self, WalletError> {
        let token_tag = inputs[0].note.token_tag;
        let nullifiers = check_inputs(&spending_key, &root, &token_tag, &inputs)?;

        for (i, output) in outputs.iter().enumerate() {
            check_output(i, output, &token_tag)?;
        }

        let spent = total(inputs.iter().map(|i| i.note.amount));
        let created = total(outputs.iter().map(|o| o.amount));
        if spent != created {
            return Err(constraint(&format!(
                "value not conserved: inputs {spent}, outputs {created}"
            )));
        }

        Ok(Self {
            root,
            token_tag,
            nullifiers,
            output_commitments: [outputs[0].commitment, outputs[1].commitment],
            spending_key,
            inputs,
            outputs,
        })
    }

    pub fn outputs(&self) -> &[Note; 2] {
        &self.outputs
    }

    pub fn to_instruction(
        &self,
        proof: crate::prover::Groth16Proof,
        new_root: Fr,
    ) -> PoolInstruction {
        PoolInstruction::Transfer {
            proof,
            root: self.root,
            nullifiers: self.nullifiers,
            commitments: self.output_commitments,
            new_root,
        }
    }
}

impl CircuitInputs for TransferInputs {
    const CIRCUIT: &'static str = "transfer";

    fn to_prover_map(&self) -> BTreeMap<String, ProverValue> {
        let mut map = spend_map(
            &self.root,
            &self.token_tag,
            &self.spending_key,
            &self.inputs,
            &self.nullifiers,
        );
        map.insert("out_commitment".into(), ProverValue::fields(&self.output_commitments));
        map.insert(
            "out_amount".into(),
            ProverValue::numbers(self.outputs.iter().map(|o| o.amount)),
        );
        map.insert("out_owner".into(), ProverValue::fields(self.outputs.iter().map(|o| &o.owner)));
        map.insert(
            "out_randomness".into(),
            ProverValue::fields(self.outputs.iter().map(|o| &o.randomness)),
        );
        map
    }
}

// ============================================================================
// Unshield
// ============================================================================

/// Two-in withdrawal with a change output and the fixed dummy output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnshieldInputs {
    pub root: Fr,
    pub token_tag: Fr,
    pub nullifiers: [Fr; 2],
    pub change_commitment: Fr,
    pub dummy_commitment: Fr,
    pub amount: u64,
    pub recipient: Pubkey,
    spending_key: Fr,
    inputs: [SpendInput; 2],
    change: Note,
}

impl UnshieldInputs {
    pub fn new(
        spending_key: Fr,
        root: Fr,
        inputs: [SpendInput; 2],
        change: Note,
        amount: u64,
        recipient: Pubkey,
    ) -> Result<Self, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount("cannot unshield zero".into()));
        }

        let token_tag = inputs[0].note.token_tag;
        let nullifiers = check_inputs(&spending_key, &root, &token_tag, &inputs)?;
        check_output(0, &change, &token_tag)?;

        let spent = total(inputs.iter().map(|i| i.note.amount));
        let created = change.amount as u128 + amount as u128;
        if spent != created {
            return Err(constraint(&format!(
                "value not conserved: inputs {spent}, change plus withdrawal {created}"
            )));
        }

        Ok(Self {
            root,
            token_tag,
            nullifiers,
            change_commitment: change.commitment,
            dummy_commitment: fixed_dummy_commitment(&token_tag),
            amount,
            recipient,
            spending_key,
            inputs,
            change,
        })
    }

    pub fn change(&self) -> &Note {
        &self.change
    }

    pub fn to_instruction(
        &self,
        proof: crate::prover::Groth16Proof,
        new_root: Fr,
    ) -> PoolInstruction {
        PoolInstruction::Withdraw {
            proof,
            root: self.root,
            nullifiers: self.nullifiers,
            change_commitment: self.change_commitment,
            dummy_commitment: self.dummy_commitment,
            amount: self.amount,
            new_root,
        }
    }
}

impl CircuitInputs for UnshieldInputs {
    const CIRCUIT: &'static str = "unshield";

    fn to_prover_map(&self) -> BTreeMap<String, ProverValue> {
        let mut map = spend_map(
            &self.root,
            &self.token_tag,
            &self.spending_key,
            &self.inputs,
            &self.nullifiers,
        );
        map.insert(
            "out_commitment".into(),
            ProverValue::fields([&self.change_commitment, &self.dummy_commitment]),
        );
        map.insert("out_amount".into(), ProverValue::numbers([self.change.amount, 0]));
        map.insert("out_owner".into(), ProverValue::fields([&self.change.owner, &Fr::zero()]));
        map.insert(
            "out_randomness".into(),
            ProverValue::fields([&self.change.randomness, &Fr::zero()]),
        );
        map.insert("public_amount".into(), ProverValue::Scalar(self.amount.to_string()));
        map.insert(
            "recipient".into(),
            ProverValue::field(&token_tag(&self.recipient.to_bytes())),
        );
        map
    }
}

// ============================================================================
// Shared checks
// ============================================================================

fn check_inputs(
    spending_key: &Fr,
    root: &Fr,
    token: &Fr,
    inputs: &[SpendInput; 2],
) -> Result<[Fr; 2], WalletError> {
    let owner = poseidon::hash(&[*spending_key]);

    for (i, input) in inputs.iter().enumerate() {
        if !input.note.is_well_formed() {
            return Err(constraint(&format!("input {i} commitment does not match its contents")));
        }
        if input.note.token_tag != *token {
            return Err(constraint(&format!("input {i} is denominated in another token")));
        }
        if input.is_dummy {
            if input.note.amount != 0 {
                return Err(constraint(&format!("dummy input {i} carries value")));
            }
            continue;
        }
        if input.note.owner != owner {
            return Err(constraint(&format!("input {i} is not owned by the spending key")));
        }
        if !input.path.verify(&input.note.commitment, root) {
            return Err(constraint(&format!("input {i} path does not reach the root")));
        }
    }

    let nullifiers = [
        compute_nullifier(&inputs[0].note.commitment, spending_key),
        compute_nullifier(&inputs[1].note.commitment, spending_key),
    ];
    if nullifiers[0] == nullifiers[1] {
        return Err(WalletError::NullifierCollision(format!(
            "both inputs produce nullifier {}",
            field::to_decimal(&nullifiers[0])
        )));
    }
    Ok(nullifiers)
}

fn check_output(i: usize, output: &Note, token: &Fr) -> Result<(), WalletError> {
    if !output.is_well_formed() {
        return Err(constraint(&format!("output {i} commitment does not match its contents")));
    }
    if output.token_tag != *token {
        return Err(constraint(&format!("output {i} is denominated in another token")));
    }
    Ok(())
}

fn spend_map(
    root: &Fr,
    token: &Fr,
    spending_key: &Fr,
    inputs: &[SpendInput; 2],
    nullifiers: &[Fr; 2],
) -> BTreeMap<String, ProverValue> {
    let mut map = BTreeMap::new();
    map.insert("root".into(), ProverValue::field(root));
    map.insert("token".into(), ProverValue::field(token));
    map.insert("spending_key".into(), ProverValue::field(spending_key));
    map.insert("nullifier".into(), ProverValue::fields(nullifiers));
    map.insert("in_amount".into(), ProverValue::numbers(inputs.iter().map(|i| i.note.amount)));
    map.insert("in_owner".into(), ProverValue::fields(inputs.iter().map(|i| &i.note.owner)));
    map.insert(
        "in_randomness".into(),
        ProverValue::fields(inputs.iter().map(|i| &i.note.randomness)),
    );
    map.insert(
        "in_is_dummy".into(),
        ProverValue::numbers(inputs.iter().map(|i| i.is_dummy as u64)),
    );
    for (i, input) in inputs.iter().enumerate() {
        map.insert(format!("in_path_siblings_{i}"), ProverValue::fields(&input.path.siblings));
        map.insert(
            format!("in_path_directions_{i}"),
            ProverValue::numbers(input.path.directions.iter().map(|d| *d as u64)),
        );
    }
    map
}

fn total(amounts: impl Iterator<Item = u64>) -> u128 {
    amounts.map(|a| a as u128).sum()
}

fn constraint(reason: &str) -> WalletError {
    WalletError::ProofGeneration(format!("constraint check failed: {reason}"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use shroud_privacy::{Identity, MerkleTree};

    pub(crate) struct Fixture {
        pub identity: Identity,
        pub tree: MerkleTree,
        pub note: Note,
        pub token: Fr,
        pub rng: StdRng,
    }

    pub(crate) fn fixture(amount: u64) -> Fixture {
        let identity = Identity::from_seed(b"prover inputs").unwrap();
        let token = Fr::from(99u64);
        let mut rng = StdRng::seed_from_u64(3);
        let mut note = Note::new(amount, identity.owner(), token, &mut rng);
        let tree = MerkleTree::from_leaves(4, &[Fr::from(1u64), note.commitment]).unwrap();
        note.place(1, tree.prove_inclusion(1).unwrap(), tree.root());
        Fixture {
            identity,
            tree,
            note,
            token,
            rng,
        }
    }

    pub(crate) fn sample_transfer() -> TransferInputs {
        let mut fx = fixture(10);
        let dummy = Note::dummy_input(fx.token, &mut fx.rng);
        let pay = Note::new(4, Fr::from(5u64), fx.token, &mut fx.rng);
        let change = Note::new(6, fx.identity.owner(), fx.token, &mut fx.rng);
        TransferInputs::new(
            fx.identity.spending_key(),
            fx.tree.root(),
            [
                SpendInput::real(fx.note.clone(), fx.tree.prove_inclusion(1).unwrap()),
                SpendInput::dummy(dummy, fx.tree.empty_path()),
            ],
            [pay, change],
        )
        .unwrap()
    }

    #[test]
    fn test_transfer_map_shape() {
        let inputs = sample_transfer();
        let map = inputs.to_prover_map();
        assert_eq!(map["root"], ProverValue::Scalar(field::to_decimal(&inputs.root)));
        let ProverValue::Array(nullifiers) = &map["nullifier"] else {
            panic!("nullifier must be an array");
        };
        assert_eq!(nullifiers.len(), 2);
        assert_eq!(map["in_is_dummy"], ProverValue::Array(vec!["0".into(), "1".into()]));
        assert!(map.contains_key("in_path_siblings_1"));

        let json = serde_json::to_value(&map).unwrap();
        assert!(json["root"].is_string());
        assert!(json["out_amount"].is_array());
    }

    #[test]
    fn test_value_must_balance() {
        let mut fx = fixture(10);
        let dummy = Note::dummy_input(fx.token, &mut fx.rng);
        let pay = Note::new(4, Fr::from(5u64), fx.token, &mut fx.rng);
        let change = Note::new(7, fx.identity.owner(), fx.token, &mut fx.rng);
        let err = TransferInputs::new(
            fx.identity.spending_key(),
            fx.tree.root(),
            [
                SpendInput::real(fx.note.clone(), fx.tree.prove_inclusion(1).unwrap()),
                SpendInput::dummy(dummy, fx.tree.empty_path()),
            ],
            [pay, change],
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::ProofGeneration(_)));
    }

    #[test]
    fn test_stale_path_rejected() {
        let mut fx = fixture(10);
        let stale_path = fx.tree.prove_inclusion(1).unwrap();
        fx.tree.insert(Fr::from(3u64)).unwrap();

        let dummy = Note::dummy_input(fx.token, &mut fx.rng);
        let change = Note::new(10, fx.identity.owner(), fx.token, &mut fx.rng);
        let dummy_out = Note::new(0, fx.identity.owner(), fx.token, &mut fx.rng);
        let err = TransferInputs::new(
            fx.identity.spending_key(),
            fx.tree.root(),
            [
                SpendInput::real(fx.note.clone(), stale_path),
                SpendInput::dummy(dummy, fx.tree.empty_path()),
            ],
            [change, dummy_out],
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::ProofGeneration(ref m) if m.contains("root")));
    }

    #[test]
    fn test_duplicate_input_is_nullifier_collision() {
        let mut fx = fixture(10);
        let path = fx.tree.prove_inclusion(1).unwrap();
        let a = Note::new(15, fx.identity.owner(), fx.token, &mut fx.rng);
        let b = Note::new(5, fx.identity.owner(), fx.token, &mut fx.rng);
        let err = TransferInputs::new(
            fx.identity.spending_key(),
            fx.tree.root(),
            [
                SpendInput::real(fx.note.clone(), path.clone()),
                SpendInput::real(fx.note.clone(), path),
            ],
            [a, b],
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::NullifierCollision(_)));
    }

    #[test]
    fn test_unshield_uses_fixed_dummy() {
        let mut fx = fixture(5);
        let dummy = Note::dummy_input(fx.token, &mut fx.rng);
        let change = Note::new(3, fx.identity.owner(), fx.token, &mut fx.rng);
        let recipient = Pubkey::new_from_array([7u8; 32]);
        let inputs = UnshieldInputs::new(
            fx.identity.spending_key(),
            fx.tree.root(),
            [
                SpendInput::real(fx.note.clone(), fx.tree.prove_inclusion(1).unwrap()),
                SpendInput::dummy(dummy, fx.tree.empty_path()),
            ],
            change,
            2,
            recipient,
        )
        .unwrap();

        assert_eq!(
            inputs.dummy_commitment,
            poseidon::hash(&[Fr::zero(), Fr::zero(), Fr::zero(), fx.token])
        );
        let map = inputs.to_prover_map();
        assert_eq!(map["public_amount"], ProverValue::Scalar("2".into()));
    }

    #[test]
    fn test_shield_inputs_check_path() {
        let fx = fixture(5);
        let path = fx.tree.prove_inclusion(1).unwrap();
        let shield = ShieldInputs::new(&fx.note, 1, &path, fx.tree.root()).unwrap();
        assert_eq!(shield.to_instruction().leaves_appended(), vec![fx.note.commitment]);
        assert!(ShieldInputs::new(&fx.note, 0, &path, fx.tree.root()).is_err());
    }
}
