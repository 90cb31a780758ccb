//! Shielded Wallet Engine
//!
//! One engine per session. It owns the local commitment tree and the note
//! ledger; every protocol run and every sync holds the same guard for its
//! whole duration.
//!
//! ```text
//! ┌────────────────────────── ShieldedWallet ───────────────────────────┐
//! │  Identity   PoolAddresses   ProverClient<T>   SecureStorage (S)     │
//! │                                                                     │
//! │  Mutex<EngineState> { tree, ledger, leaf cache, trusted, last op }  │
//! └───────────────────────────────┬─────────────────────────────────────┘
//!                                 │ ChainClient (C)
//!                                 ▼
//!                         tree account, history, submit
//! ```

use log::{info, warn};
use rand::rngs::OsRng;
use shroud_privacy::{Fr, Identity, MerkleTree, Note, SpentSet, token_tag};
use tokio::sync::Mutex;

use crate::chain::{ChainClient, PoolAddresses};
use crate::config::WalletConfig;
use crate::error::{ImportError, WalletError};
use crate::export;
use crate::ledger::{NoteLedger, PendingSubmission, Selection, short};
use crate::prover::ProofTransport;
use crate::prover::ProverClient;
use crate::prover::inputs::SpendInput;
use crate::protocol::OperationRecord;
use crate::storage::SecureStorage;
use crate::sync::{LeafCache, Reconciler, SyncReport};

pub(crate) struct EngineState {
    pub(crate) tree: MerkleTree,
    pub(crate) ledger: NoteLedger,
    pub(crate) cache: LeafCache,
    /// Last sync matched the recorded root
    pub(crate) trusted: bool,
    pub(crate) last_operation: Option<OperationRecord>,
}

pub struct ShieldedWallet<C: ChainClient, T: ProofTransport, S: SecureStorage> {
    pub(crate) config: WalletConfig,
    pub(crate) identity: Identity,
    pub(crate) pool: PoolAddresses,
    pub(crate) token_tag: Fr,
    pub(crate) chain: C,
    pub(crate) prover: ProverClient<T>,
    pub(crate) storage: S,
    pub(crate) state: Mutex<EngineState>,
}

impl<C: ChainClient, T: ProofTransport, S: SecureStorage> ShieldedWallet<C, T, S> {
    /// Derive the identity and load the persisted ledger
    ///
    /// Nothing is read from the chain until the first sync or protocol run.
    pub fn new(
        config: WalletConfig,
        seed: &[u8],
        chain: C,
        transport: T,
        storage: S,
    ) -> Result<Self, WalletError> {
        let identity =
            Identity::from_seed(seed).map_err(|e| WalletError::Initialization(e.to_string()))?;
        let program_id = config
            .program_id()
            .map_err(|e| WalletError::Initialization(format!("{e:#}")))?;
        let mint = config
            .token_mint()
            .map_err(|e| WalletError::Initialization(format!("{e:#}")))?;
        let tree = MerkleTree::new(config.tree.depth)
            .map_err(|e| WalletError::Initialization(e.to_string()))?;

        let ledger = NoteLedger::load(&storage, identity.owner())?;
        let cache = LeafCache::load(&storage)?;
        let pool = PoolAddresses::derive(program_id, mint);
        let prover = ProverClient::new(transport, config.prover_timeout());

        info!(
            "Wallet ready: pool {}, tree {}, {} stored notes",
            pool.program_id,
            pool.tree,
            ledger.len()
        );

        Ok(Self {
            token_tag: token_tag(&mint.to_bytes()),
            config,
            identity,
            pool,
            chain,
            prover,
            storage,
            state: Mutex::new(EngineState {
                tree,
                ledger,
                cache,
                trusted: false,
                last_operation: None,
            }),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn pool(&self) -> &PoolAddresses {
        &self.pool
    }

    pub fn token_tag(&self) -> Fr {
        self.token_tag
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn prover(&self) -> &ProverClient<T> {
        &self.prover
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Sum of spendable notes
    pub async fn balance(&self) -> u64 {
        self.state.lock().await.ledger.balance()
    }

    pub async fn notes(&self) -> Vec<Note> {
        self.state.lock().await.ledger.notes().to_vec()
    }

    /// Root of the local tree
    pub async fn root(&self) -> Fr {
        self.state.lock().await.tree.root()
    }

    pub async fn leaf_count(&self) -> u64 {
        self.state.lock().await.tree.leaf_count()
    }

    pub async fn last_operation(&self) -> Option<OperationRecord> {
        self.state.lock().await.last_operation.clone()
    }

    /// Submissions whose outcome the next sync will settle
    pub async fn pending_submissions(&self) -> Vec<PendingSubmission> {
        self.state.lock().await.ledger.pending().to_vec()
    }

    /// At most two spendable notes covering `target`, skipping notes the
    /// pool may already have seen spent
    pub async fn select_notes_for_amount(&self, target: u64) -> Result<Selection, WalletError> {
        let state = self.state.lock().await;
        let spent = self.reconciler().spent_set().await?;
        Ok(self.select_locked(&state, target, &spent))
    }

    pub async fn might_be_spent(&self, nullifier: &Fr) -> Result<bool, WalletError> {
        let spent = self.reconciler().spent_set().await?;
        Ok(spent.might_be_spent(nullifier))
    }

    /// Rebuild local state from the chain
    pub async fn sync(&self) -> Result<SyncReport, WalletError> {
        let mut state = self.state.lock().await;
        self.sync_locked(&mut state).await
    }

    /// Encode a placed note for another holder of this identity
    pub fn export_note(&self, note: &Note) -> Result<String, WalletError> {
        export::encode_note(note)
    }

    /// Verify an exported note against the chain and add it to the ledger
    pub async fn import_note(&self, encoded: &str) -> Result<Note, WalletError> {
        let mut note = export::decode_note(encoded)?;
        if note.owner != self.identity.owner() {
            return Err(ImportError::WrongOwner.into());
        }
        if note.token_tag != self.token_tag {
            let reason = "note is denominated in another token";
            return Err(ImportError::Malformed(reason.into()).into());
        }
        let Some(index) = note.leaf_index else {
            return Err(ImportError::Malformed("missing leaf index".into()).into());
        };

        let mut state = self.state.lock().await;
        if let Some(held) = state.ledger.find_by_commitment(&note.commitment) {
            let leaf_index = held.leaf_index.unwrap_or(index);
            return Err(ImportError::AlreadyPresent { leaf_index }.into());
        }
        if let Some(held) = state.ledger.get(index) {
            return Err(WalletError::LedgerCorruption(format!(
                "leaf {index} already holds note {}, refusing import of {}",
                short(&held.commitment),
                short(&note.commitment)
            )));
        }

        self.ensure_fresh(&mut state).await?;
        if state.tree.get_leaf(index) != Some(note.commitment) {
            return Err(ImportError::NotYetOnChain { leaf_index: index }.into());
        }

        let path = state.tree.prove_inclusion(index)?;
        let root = state.tree.root();
        note.place(index, path, root);
        note.confirmed_on_chain = state.trusted;
        state.ledger.add_note(note.clone())?;
        state.ledger.persist(&self.storage)?;
        info!("Imported note of {} at leaf {index}", note.amount);
        Ok(note)
    }

    pub(crate) fn reconciler(&self) -> Reconciler<'_, C> {
        Reconciler::new(
            &self.chain,
            &self.pool,
            self.config.tree.depth,
            self.config.sync.page_size,
            self.config.retry_policy(),
        )
    }

    pub(crate) async fn sync_locked(
        &self,
        state: &mut EngineState,
    ) -> Result<SyncReport, WalletError> {
        let EngineState {
            ledger,
            cache,
            tree,
            trusted,
            ..
        } = state;

        match self.reconciler().run(ledger, cache, &self.storage).await {
            Ok((rebuilt, report)) => {
                *tree = rebuilt;
                *trusted = report.outcome.is_trusted();
                Ok(report)
            }
            Err(e) => {
                *trusted = false;
                if !e.is_recoverable() {
                    warn!("Sync failed, local notes are untrusted until the next sync: {e}");
                    ledger.demote_all();
                    if let Err(persist_err) = ledger.persist(&self.storage) {
                        warn!("Failed to persist demoted notes: {persist_err}");
                    }
                }
                Err(e)
            }
        }
    }

    /// Sync when the local tree no longer matches the tree account or a
    /// submission is still pending
    pub(crate) async fn ensure_fresh(&self, state: &mut EngineState) -> Result<(), WalletError> {
        let authority = self.reconciler().authority().await?;
        if state.trusted
            && !state.ledger.has_pending()
            && authority.leaf_count == state.tree.leaf_count()
            && authority.root == state.tree.root()
        {
            return Ok(());
        }

        info!(
            "Local tree at {} leaves, chain at {}: syncing",
            state.tree.leaf_count(),
            authority.leaf_count
        );
        self.sync_locked(state).await.map(|_| ())
    }

    pub(crate) fn select_locked(
        &self,
        state: &EngineState,
        target: u64,
        spent: &SpentSet,
    ) -> Selection {
        if !state.trusted {
            return Selection::default();
        }
        let key = self.identity.nullifier_key();
        state
            .ledger
            .select(target, |note| spent.might_be_spent(&note.nullifier(&key)))
    }

    /// Balance that selection could draw from right now
    pub(crate) fn available_locked(&self, state: &EngineState, spent: &SpentSet) -> u64 {
        if !state.trusted {
            return 0;
        }
        let key = self.identity.nullifier_key();
        state
            .ledger
            .spendable()
            .filter(|note| !spent.might_be_spent(&note.nullifier(&key)))
            .fold(0u64, |acc, note| acc.saturating_add(note.amount))
    }

    /// Selected notes with fresh paths, padded with a dummy input
    pub(crate) fn spend_inputs(
        &self,
        state: &EngineState,
        selection: &Selection,
    ) -> Result<[SpendInput; 2], WalletError> {
        let mut inputs = Vec::with_capacity(2);
        for note in &selection.notes {
            let index = note.leaf_index.ok_or_else(|| {
                WalletError::LedgerCorruption("selected note has no leaf index".into())
            })?;
            if state.tree.get_leaf(index) != Some(note.commitment) {
                return Err(WalletError::LedgerCorruption(format!(
                    "leaf {index} does not hold the selected note"
                )));
            }
            inputs.push(SpendInput::real(note.clone(), state.tree.prove_inclusion(index)?));
        }
        while inputs.len() < 2 {
            let dummy = Note::dummy_input(self.token_tag, &mut OsRng);
            inputs.push(SpendInput::dummy(dummy, state.tree.empty_path()));
        }

        let mut inputs = inputs.into_iter();
        match (inputs.next(), inputs.next()) {
            (Some(first), Some(second)) => Ok([first, second]),
            _ => Err(WalletError::LedgerCorruption("selection produced no inputs".into())),
        }
    }

    /// Nullifier of the padding input, if the selection needed one
    pub(crate) fn dummy_nullifier(selection: &Selection, nullifiers: &[Fr; 2]) -> Option<Fr> {
        (selection.notes.len() < 2).then_some(nullifiers[1])
    }
}
