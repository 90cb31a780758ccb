//! In-process pool program
//!
//! `MemoryChain` executes pool instructions against an in-memory commitment
//! tree, spent set and vault, keeps a signature history with program logs,
//! and exposes fault injection for rate limits, rejections, lost history and
//! concurrent deposits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use log::debug;
use shroud_privacy::{Fr, MerkleTree, PrivacyError, SpentSet};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use super::accounts::{PoolAddresses, TreeAccount, encode_spent_set};
use super::instruction::{PoolInstruction, leaf_log};
use super::{
    ChainClient, ChainError, Confirmation, HistoricalTransaction, RawInstruction, SignatureInfo,
};

/// Spent-set parameters of the simulated pool
pub const SPENT_SET_BITS: u32 = 1 << 16;
pub const SPENT_SET_HASHES: u8 = 3;

/// Recorded roots a proof may reference
const ROOT_HISTORY: usize = 64;

struct StoredTransaction {
    tx: HistoricalTransaction,
    confirmation: Confirmation,
}

#[derive(Default)]
struct Faults {
    rate_limited_reads: u32,
    reject_next: Option<String>,
    fail_next_on_chain: Option<String>,
    foreign_before_next_submit: Vec<(u64, Fr)>,
    withhold_confirmations: bool,
}

struct ChainState {
    tree: MerkleTree,
    recorded_root: Fr,
    known_roots: VecDeque<Fr>,
    spent: SpentSet,
    nullifiers: HashSet<Fr>,
    vault: u64,
    balances: HashMap<Pubkey, u64>,
    transactions: Vec<StoredTransaction>,
    hidden: HashSet<Signature>,
    submissions: Vec<Vec<Instruction>>,
    slot: u64,
    faults: Faults,
}

pub struct MemoryChain {
    payer: Pubkey,
    pool: PoolAddresses,
    state: Mutex<ChainState>,
}

impl MemoryChain {
    pub fn new(pool: PoolAddresses, depth: usize) -> Result<Self, PrivacyError> {
        let tree = MerkleTree::new(depth)?;
        let recorded_root = tree.root();
        let spent = SpentSet::new(SPENT_SET_BITS, SPENT_SET_HASHES)?;
        let payer = Pubkey::new_from_array(*blake3::hash(b"shroud memory chain payer").as_bytes());

        Ok(Self {
            payer,
            pool,
            state: Mutex::new(ChainState {
                tree,
                recorded_root,
                known_roots: VecDeque::from([recorded_root]),
                spent,
                nullifiers: HashSet::new(),
                vault: 0,
                balances: HashMap::new(),
                transactions: Vec::new(),
                hidden: HashSet::new(),
                submissions: Vec::new(),
                slot: 1,
                faults: Faults::default(),
            }),
        })
    }

    pub fn pool(&self) -> &PoolAddresses {
        &self.pool
    }

    pub fn leaf_count(&self) -> u64 {
        self.state().tree.leaf_count()
    }

    /// Root the tree account currently reports
    pub fn recorded_root(&self) -> Fr {
        self.state().recorded_root
    }

    pub fn leaves(&self) -> Vec<Fr> {
        self.state().tree.leaves()
    }

    pub fn vault_balance(&self) -> u64 {
        self.state().vault
    }

    /// Public balance credited by withdrawals
    pub fn balance_of(&self, owner: &Pubkey) -> u64 {
        self.state().balances.get(owner).copied().unwrap_or(0)
    }

    pub fn is_nullifier_spent(&self, nullifier: &Fr) -> bool {
        self.state().nullifiers.contains(nullifier)
    }

    /// Signatures of all landed transactions, oldest first
    pub fn signatures_chronological(&self) -> Vec<Signature> {
        self.state()
            .transactions
            .iter()
            .map(|t| t.tx.signature)
            .collect()
    }

    /// Instruction lists passed to `submit`, in order
    pub fn submissions(&self) -> Vec<Vec<Instruction>> {
        self.state().submissions.clone()
    }

    /// Deposit made by another party, landing immediately
    pub fn deposit_foreign(&self, commitment: Fr, amount: u64) -> Result<Signature, ChainError> {
        let mut state = self.state();
        let instruction = PoolInstruction::Deposit {
            amount,
            commitment,
            new_root: Fr::from(0u64),
        };
        self.execute(&mut state, &instruction, None)
    }

    /// Deposit by another party that lands just before the next submission
    pub fn queue_foreign_deposit(&self, commitment: Fr, amount: u64) {
        self.state()
            .faults
            .foreign_before_next_submit
            .push((amount, commitment));
    }

    /// Fail the next `count` history/account reads with a rate limit
    pub fn rate_limit_next(&self, count: u32) {
        self.state().faults.rate_limited_reads = count;
    }

    /// Reject the next submission before it lands
    pub fn reject_next(&self, reason: &str) {
        self.state().faults.reject_next = Some(reason.to_string());
    }

    /// Land the next submission as a failed transaction
    pub fn fail_next_on_chain(&self, reason: &str) {
        self.state().faults.fail_next_on_chain = Some(reason.to_string());
    }

    /// Keep confirmations pending until released
    pub fn withhold_confirmations(&self, withhold: bool) {
        self.state().faults.withhold_confirmations = withhold;
    }

    /// Overwrite the root reported by the tree account
    pub fn set_recorded_root(&self, root: Fr) {
        self.state().recorded_root = root;
    }

    /// Drop a transaction from the history the RPC serves
    pub fn hide_transaction(&self, signature: &Signature) {
        self.state().hidden.insert(*signature);
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_rate_limit(state: &mut ChainState) -> Result<(), ChainError> {
        if state.faults.rate_limited_reads > 0 {
            state.faults.rate_limited_reads -= 1;
            return Err(ChainError::RateLimited);
        }
        Ok(())
    }

    fn next_signature(state: &ChainState) -> Signature {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"shroud memory chain signature");
        hasher.update(&(state.transactions.len() as u64).to_le_bytes());
        hasher.update(&state.slot.to_le_bytes());
        let mut bytes = [0u8; 64];
        hasher.finalize_xof().fill(&mut bytes);
        Signature::from(bytes)
    }

    fn validate(state: &ChainState, instruction: &PoolInstruction) -> Result<(), ChainError> {
        match instruction {
            PoolInstruction::Deposit { amount, .. } => {
                if *amount == 0 {
                    return Err(ChainError::Rejected("deposit amount is zero".into()));
                }
            }
            PoolInstruction::Transfer {
                root, nullifiers, ..
            }
            | PoolInstruction::Withdraw {
                root, nullifiers, ..
            } => {
                if !state.known_roots.contains(root) {
                    return Err(ChainError::Rejected("unknown merkle root".into()));
                }
                if nullifiers[0] == nullifiers[1] {
                    return Err(ChainError::Rejected("duplicate nullifier".into()));
                }
                if nullifiers.iter().any(|n| state.nullifiers.contains(n)) {
                    return Err(ChainError::Rejected("nullifier already spent".into()));
                }
            }
        }

        if let PoolInstruction::Withdraw { amount, .. } = instruction {
            if *amount > state.vault {
                return Err(ChainError::Rejected("insufficient vault balance".into()));
            }
        }

        let appended = instruction.leaves_appended().len() as u64;
        if state.tree.leaf_count() + appended > state.tree.capacity() {
            return Err(ChainError::Rejected("commitment tree is full".into()));
        }
        Ok(())
    }

    fn execute(
        &self,
        state: &mut ChainState,
        instruction: &PoolInstruction,
        recipient: Option<Pubkey>,
    ) -> Result<Signature, ChainError> {
        Self::validate(state, instruction)?;

        let first = state.tree.leaf_count();
        let leaves = instruction.leaves_appended();
        for leaf in &leaves {
            state
                .tree
                .insert(*leaf)
                .map_err(|e| ChainError::Rejected(e.to_string()))?;
        }
        for nullifier in instruction.nullifiers() {
            state.nullifiers.insert(*nullifier);
            state.spent.insert(nullifier);
        }

        match instruction {
            PoolInstruction::Deposit { amount, .. } => state.vault += amount,
            PoolInstruction::Withdraw { amount, .. } => {
                state.vault -= amount;
                if let Some(recipient) = recipient {
                    *state.balances.entry(recipient).or_insert(0) += amount;
                }
            }
            PoolInstruction::Transfer { .. } => {}
        }

        let root = state.tree.root();
        if instruction.new_root() != root {
            debug!("Client root hint differs from executed root at leaf {first}");
        }
        state.recorded_root = root;
        state.known_roots.push_back(root);
        if state.known_roots.len() > ROOT_HISTORY {
            state.known_roots.pop_front();
        }

        let logs = vec![
            format!("Program {} invoke [1]", self.pool.program_id),
            leaf_log(first, leaves.len() as u64),
            format!("Program {} success", self.pool.program_id),
        ];
        Ok(Self::record(
            state,
            vec![RawInstruction {
                program_id: self.pool.program_id,
                data: instruction.encode(),
            }],
            logs,
            None,
        ))
    }

    fn record(
        state: &mut ChainState,
        instructions: Vec<RawInstruction>,
        logs: Vec<String>,
        failure: Option<String>,
    ) -> Signature {
        let signature = Self::next_signature(state);
        let slot = state.slot;
        state.slot += 1;

        let confirmation = match &failure {
            Some(error) => Confirmation::Failed {
                error: error.clone(),
            },
            None => Confirmation::Confirmed {
                slot,
                logs: logs.clone(),
            },
        };

        state.transactions.push(StoredTransaction {
            tx: HistoricalTransaction {
                signature,
                slot,
                instructions,
                logs,
                failed: failure.is_some(),
            },
            confirmation,
        });
        signature
    }
}

impl ChainClient for MemoryChain {
    fn payer(&self) -> Pubkey {
        self.payer
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Vec<u8>, ChainError> {
        let mut state = self.state();
        Self::take_rate_limit(&mut state)?;

        if *address == self.pool.tree {
            let depth = state.tree.depth() as u8;
            Ok(TreeAccount {
                root: state.recorded_root,
                leaf_count: state.tree.leaf_count(),
                depth,
            }
            .encode())
        } else if *address == self.pool.nullifiers {
            Ok(encode_spent_set(&state.spent))
        } else {
            Err(ChainError::AccountNotFound(*address))
        }
    }

    async fn signatures(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, ChainError> {
        let mut state = self.state();
        Self::take_rate_limit(&mut state)?;

        if *address != self.pool.tree {
            return Ok(Vec::new());
        }

        let newest_first = state
            .transactions
            .iter()
            .rev()
            .filter(|t| !state.hidden.contains(&t.tx.signature));

        let mut page = Vec::new();
        let mut started = before.is_none();
        for stored in newest_first {
            let signature = stored.tx.signature;
            if Some(signature) == until {
                break;
            }
            if !started {
                started = Some(signature) == before;
                continue;
            }
            if page.len() >= limit {
                break;
            }
            page.push(SignatureInfo {
                signature,
                slot: stored.tx.slot,
                failed: stored.tx.failed,
            });
        }
        Ok(page)
    }

    async fn transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<HistoricalTransaction>, ChainError> {
        let mut state = self.state();
        Self::take_rate_limit(&mut state)?;

        if state.hidden.contains(signature) {
            return Ok(None);
        }
        Ok(state
            .transactions
            .iter()
            .find(|t| t.tx.signature == *signature)
            .map(|t| t.tx.clone()))
    }

    async fn submit(&self, instructions: Vec<Instruction>) -> Result<Signature, ChainError> {
        let mut state = self.state();
        state.submissions.push(instructions.clone());

        if let Some(reason) = state.faults.reject_next.take() {
            return Err(ChainError::Rejected(reason));
        }

        for (amount, commitment) in std::mem::take(&mut state.faults.foreign_before_next_submit) {
            let foreign = PoolInstruction::Deposit {
                amount,
                commitment,
                new_root: Fr::from(0u64),
            };
            self.execute(&mut state, &foreign, None)?;
        }

        let Some(pool_ix) = instructions
            .iter()
            .find(|ix| ix.program_id == self.pool.program_id)
        else {
            return Err(ChainError::Rejected("no pool instruction".into()));
        };
        let decoded = PoolInstruction::decode(&pool_ix.data)
            .map_err(|e| ChainError::Rejected(e.to_string()))?;

        if let Some(reason) = state.faults.fail_next_on_chain.take() {
            let raw = vec![RawInstruction {
                program_id: pool_ix.program_id,
                data: pool_ix.data.clone(),
            }];
            let logs = vec![format!("Program {} failed: {reason}", self.pool.program_id)];
            return Ok(Self::record(&mut state, raw, logs, Some(reason)));
        }

        // accounts: payer, tree, nullifiers, vault, recipient
        let recipient = pool_ix.accounts.get(4).map(|meta| meta.pubkey);
        self.execute(&mut state, &decoded, recipient)
    }

    async fn confirmation(
        &self,
        signature: &Signature,
    ) -> Result<Option<Confirmation>, ChainError> {
        let state = self.state();
        if state.faults.withhold_confirmations {
            return Ok(None);
        }
        Ok(state
            .transactions
            .iter()
            .find(|t| t.tx.signature == *signature)
            .map(|t| t.confirmation.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> MemoryChain {
        let pool = PoolAddresses::derive(
            Pubkey::new_from_array([1u8; 32]),
            Pubkey::new_from_array([2u8; 32]),
        );
        MemoryChain::new(pool, 8).unwrap()
    }

    #[tokio::test]
    async fn test_deposit_updates_tree_account() {
        let chain = chain();
        chain.deposit_foreign(Fr::from(11u64), 5).unwrap();
        chain.deposit_foreign(Fr::from(12u64), 6).unwrap();

        let data = chain.account_data(&chain.pool().tree).await.unwrap();
        let account = TreeAccount::parse(&data).unwrap();
        assert_eq!(account.leaf_count, 2);
        assert_eq!(
            account.root,
            MerkleTree::from_leaves(8, &[Fr::from(11u64), Fr::from(12u64)])
                .unwrap()
                .root()
        );
        assert_eq!(chain.vault_balance(), 11);
    }

    #[tokio::test]
    async fn test_signature_pagination() {
        let chain = chain();
        for i in 0..5u64 {
            chain.deposit_foreign(Fr::from(i + 1), 1).unwrap();
        }
        let all = chain.signatures_chronological();
        let tree = chain.pool().tree;

        let first = chain.signatures(&tree, None, None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].signature, all[4]);

        let second = chain
            .signatures(&tree, Some(first[1].signature), None, 10)
            .await
            .unwrap();
        assert_eq!(second.len(), 3);
        assert_eq!(second[2].signature, all[0]);

        let bounded = chain.signatures(&tree, None, Some(all[2]), 10).await.unwrap();
        assert_eq!(bounded.len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_injection() {
        let chain = chain();
        chain.rate_limit_next(1);
        let tree = chain.pool().tree;
        assert_eq!(
            chain.account_data(&tree).await,
            Err(ChainError::RateLimited)
        );
        assert!(chain.account_data(&tree).await.is_ok());
    }

    #[tokio::test]
    async fn test_hidden_transaction() {
        let chain = chain();
        let sig = chain.deposit_foreign(Fr::from(1u64), 1).unwrap();
        chain.hide_transaction(&sig);
        assert_eq!(chain.transaction(&sig).await.unwrap(), None);
        let page = chain.signatures(&chain.pool().tree, None, None, 10).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(chain.leaf_count(), 1);
    }
}
