//! Chain Reconciliation
//!
//! Rebuilds the commitment tree from public history and checks it against
//! the tree account, the authority for root and leaf count.
//!
//! ```text
//!   tree account ──▶ (root, leaf_count)
//!                               │
//!   cached leaves + new history ┼──▶ runs past leaf_count? re-read the account
//!                               │
//!                               ├──▶ covers 0..leaf_count?
//!                               │      no ──▶ ignore caches, full re-fetch
//!                               ▼
//!   attribute every index: history ▶ local note ▶ previous cache ▶ fail
//!                               │
//!                 rebuild tree fresh, compare roots
//!        match ──▶ settle pending submissions, confirm notes where found,
//!                  drop the rest, replace caches
//!     diverge ──▶ rebuilt tree wins, local notes unconfirmed
//! ```
//!
//! A placeholder leaf is never invented for an index nobody can vouch for.
//! The persisted caches are only replaced by a sync whose root matched.

pub mod cache;
pub mod scanner;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use log::{debug, info, warn};
use shroud_privacy::{Fr, MerkleTree, SpentSet};
use solana_sdk::signature::Signature;

use crate::chain::accounts::parse_spent_set;
use crate::chain::{
    ChainClient, Confirmation, PoolAddresses, RetryPolicy, TreeAccount, retry_with_backoff,
};
use crate::error::WalletError;
use crate::ledger::{NoteLedger, short};
use crate::storage::SecureStorage;
pub use cache::LeafCache;
pub use scanner::{HistoryScanner, ScanResult};

/// How a sync ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Rebuilt root equals the recorded root
    Matched,
    /// Matched, but only after caches were set aside and history re-fetched
    MatchedAfterRefetch,
    /// Leaf counts agree, roots differ; notes are not trusted for spending
    RootDivergence,
}

impl SyncOutcome {
    pub fn is_trusted(&self) -> bool {
        !matches!(self, SyncOutcome::RootDivergence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub leaf_count: u64,
    pub root: Fr,
    /// Notes confirmed at their discovered index
    pub confirmed: usize,
    /// Notes dropped because no leaf holds their commitment
    pub dropped: usize,
    /// Transactions inspected
    pub scanned: usize,
}

pub struct Reconciler<'a, C: ChainClient> {
    chain: &'a C,
    pool: &'a PoolAddresses,
    depth: usize,
    page_size: usize,
    retry: RetryPolicy,
}

impl<'a, C: ChainClient> Reconciler<'a, C> {
    pub fn new(
        chain: &'a C,
        pool: &'a PoolAddresses,
        depth: usize,
        page_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            chain,
            pool,
            depth,
            page_size,
            retry,
        }
    }

    /// Current root and leaf count of the tree account
    pub async fn authority(&self) -> Result<TreeAccount, WalletError> {
        let data = retry_with_backoff(&self.retry, "fetch tree account", || {
            self.chain.account_data(&self.pool.tree)
        })
        .await?;
        Ok(TreeAccount::parse(&data)?)
    }

    /// Snapshot of the pool's spent-nullifier bits
    pub async fn spent_set(&self) -> Result<SpentSet, WalletError> {
        let data = retry_with_backoff(&self.retry, "fetch nullifier set", || {
            self.chain.account_data(&self.pool.nullifiers)
        })
        .await?;
        Ok(parse_spent_set(&data)?)
    }

    /// Reconcile `ledger` against the chain and return the rebuilt tree
    pub async fn run<S: SecureStorage>(
        &self,
        ledger: &mut NoteLedger,
        cache: &mut LeafCache,
        storage: &S,
    ) -> Result<(MerkleTree, SyncReport), WalletError> {
        let mut authority = self.authority().await?;
        if authority.depth as usize != self.depth {
            return Err(WalletError::ReconciliationMismatch(format!(
                "tree account depth {} differs from configured depth {}",
                authority.depth, self.depth
            )));
        }

        let scanner = HistoryScanner::new(self.chain, self.pool, self.page_size, self.retry);
        let incremental = cache.cursor.is_some();
        let next_index = cache.leaves.keys().next_back().map_or(0, |i| i + 1);

        let pass = scanner.scan(cache.cursor, next_index).await?;
        let mut scanned = pass.scanned;
        let mut newest = pass.newest;
        let mut leaves = cache.leaves.clone();
        leaves.extend(pass.leaves);

        // appends that landed after the account was read
        if runs_past(&leaves, authority.leaf_count) {
            debug!(
                "History runs past {} leaves, re-reading the tree account",
                authority.leaf_count
            );
            authority = self.authority().await?;
        }
        let leaf_count = authority.leaf_count;

        let mut refetched = false;
        let mut previous = BTreeMap::new();
        if !covers(&leaves, leaf_count) {
            warn!(
                "History accounts for {} of {leaf_count} leaves, ignoring caches",
                leaves.range(..leaf_count).count()
            );
            previous = cache.leaves.clone();
            if incremental {
                let full = scanner.scan(None, 0).await?;
                scanned += full.scanned;
                newest = full.newest;
                leaves = full.leaves;
            }
            refetched = true;
        }

        // the account is a prefix of history; later appends wait for the next sync
        if runs_past(&leaves, leaf_count) {
            let beyond = leaves.split_off(&leaf_count);
            debug!("Leaving {} leaves past {leaf_count} for the next sync", beyond.len());
            newest = None;
        }

        let ordered = attribute(leaf_count, &leaves, ledger, &previous)?;
        let tree = MerkleTree::from_leaves(self.depth, &ordered)?;

        let mut report = SyncReport {
            outcome: if refetched {
                SyncOutcome::MatchedAfterRefetch
            } else {
                SyncOutcome::Matched
            },
            leaf_count,
            root: tree.root(),
            confirmed: 0,
            dropped: 0,
            scanned,
        };

        if tree.root() != authority.root {
            warn!(
                "Rebuilt root {} differs from recorded root {} at {leaf_count} leaves",
                short(&tree.root()),
                short(&authority.root)
            );
            ledger.demote_all();
            ledger.persist(storage)?;
            report.outcome = SyncOutcome::RootDivergence;
            return Ok((tree, report));
        }

        let positions: HashMap<Fr, u64> = ordered
            .iter()
            .enumerate()
            .map(|(i, leaf)| (*leaf, i as u64))
            .collect();
        self.settle_pending(ledger, &positions).await?;

        let (confirmed, dropped) = confirm_notes(ledger, &tree, &positions)?;
        report.confirmed = confirmed;
        report.dropped = dropped;
        ledger.persist(storage)?;

        *cache = LeafCache {
            cursor: newest,
            leaves: ordered
                .iter()
                .enumerate()
                .map(|(i, leaf)| (i as u64, *leaf))
                .collect(),
        };
        cache.persist(storage)?;

        info!(
            "Sync {:?}: {leaf_count} leaves, {confirmed} notes confirmed, {dropped} dropped",
            report.outcome
        );
        Ok((tree, report))
    }

    /// Resolve submissions whose outcome was never observed
    ///
    /// Landed when the tree holds one of their appends; released when the
    /// chain reports them failed; otherwise they stay pending.
    async fn settle_pending(
        &self,
        ledger: &mut NoteLedger,
        positions: &HashMap<Fr, u64>,
    ) -> Result<(), WalletError> {
        for pending in ledger.pending().to_vec() {
            if let Some(index) = pending.appended.iter().find_map(|c| positions.get(c)) {
                info!("Pending submission {} landed at leaf {index}", pending.signature);
                ledger.settle_pending(&pending.signature, |c| positions.get(c).copied());
                continue;
            }

            let signature = Signature::from_str(&pending.signature).map_err(|e| {
                WalletError::LedgerCorruption(format!(
                    "pending submission {}: {e}",
                    pending.signature
                ))
            })?;
            let status = retry_with_backoff(&self.retry, "poll pending submission", || {
                self.chain.confirmation(&signature)
            })
            .await?;
            match status {
                Some(Confirmation::Failed { error }) => {
                    info!("Pending submission {signature} failed on chain: {error}");
                    ledger.release_pending(&pending.signature);
                }
                _ => debug!("Submission {signature} still pending"),
            }
        }
        Ok(())
    }
}

/// Some leaf sits at or beyond `leaf_count`
fn runs_past(leaves: &BTreeMap<u64, Fr>, leaf_count: u64) -> bool {
    leaves.keys().next_back().is_some_and(|last| *last >= leaf_count)
}

/// Every index below `leaf_count` has a commitment
fn covers(leaves: &BTreeMap<u64, Fr>, leaf_count: u64) -> bool {
    leaves.range(..leaf_count).count() as u64 == leaf_count
}

/// Commitment for every index, in order
fn attribute(
    leaf_count: u64,
    history: &BTreeMap<u64, Fr>,
    ledger: &NoteLedger,
    previous: &BTreeMap<u64, Fr>,
) -> Result<Vec<Fr>, WalletError> {
    let attributed: HashSet<Fr> = history.values().copied().collect();
    let mut ordered = Vec::with_capacity(leaf_count as usize);

    for index in 0..leaf_count {
        if let Some(leaf) = history.get(&index) {
            ordered.push(*leaf);
            continue;
        }

        // a local note only vouches for its index when history has not
        // placed its commitment elsewhere
        let local = ledger
            .get(index)
            .filter(|note| note.is_well_formed() && !attributed.contains(&note.commitment));
        if let Some(note) = local {
            info!("Leaf {index} attributed from local note {}", short(&note.commitment));
            ordered.push(note.commitment);
            continue;
        }

        if let Some(leaf) = previous.get(&index) {
            info!("Leaf {index} attributed from the cached commitment table");
            ordered.push(*leaf);
            continue;
        }

        return Err(WalletError::MissingLeaf { index });
    }
    Ok(ordered)
}

/// Confirm notes found in the rebuilt tree, drop the rest
fn confirm_notes(
    ledger: &mut NoteLedger,
    tree: &MerkleTree,
    positions: &HashMap<Fr, u64>,
) -> Result<(usize, usize), WalletError> {
    let before = ledger.len();
    let mut kept = Vec::with_capacity(before);
    let mut seen = HashSet::new();

    for mut note in ledger.notes_mut().drain(..) {
        if !note.is_well_formed() {
            warn!("Dropping corrupt note {}", short(&note.commitment));
            continue;
        }
        let Some(index) = positions.get(&note.commitment).copied() else {
            warn!(
                "Dropping note {} claimed at leaf {:?}: not in the tree",
                short(&note.commitment),
                note.leaf_index
            );
            continue;
        };
        if !seen.insert(index) {
            continue;
        }
        if note.leaf_index != Some(index) {
            info!(
                "Note {} moved from leaf {:?} to {index}",
                short(&note.commitment),
                note.leaf_index
            );
        }

        note.place(index, tree.prove_inclusion(index)?, tree.root());
        note.confirmed_on_chain = true;
        kept.push(note);
    }

    let confirmed = kept.len();
    *ledger.notes_mut() = kept;
    Ok((confirmed, before - confirmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChain;
    use crate::storage::MemoryStorage;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use shroud_privacy::Note;
    use solana_sdk::pubkey::Pubkey;
    use std::time::Duration;

    const DEPTH: usize = 8;

    struct Harness {
        chain: MemoryChain,
        pool: PoolAddresses,
        storage: MemoryStorage,
        ledger: NoteLedger,
        cache: LeafCache,
        rng: StdRng,
    }

    impl Harness {
        fn new() -> Self {
            let pool = PoolAddresses::derive(
                Pubkey::new_from_array([1u8; 32]),
                Pubkey::new_from_array([2u8; 32]),
            );
            Self {
                chain: MemoryChain::new(pool, DEPTH).unwrap(),
                pool,
                storage: MemoryStorage::new(),
                ledger: NoteLedger::new(Fr::from(77u64)),
                cache: LeafCache::default(),
                rng: StdRng::seed_from_u64(21),
            }
        }

        fn note(&mut self, amount: u64) -> Note {
            Note::new(amount, Fr::from(77u64), Fr::from(5u64), &mut self.rng)
        }

        /// Deposit a note on chain and record it locally at `claimed`
        fn deposit_own(&mut self, amount: u64, claimed: u64) -> Note {
            let mut note = self.note(amount);
            self.chain.deposit_foreign(note.commitment, amount).unwrap();
            let tree = MerkleTree::new(DEPTH).unwrap();
            note.place(claimed, tree.empty_path(), tree.root());
            self.ledger.add_note(note.clone()).unwrap();
            note
        }

        async fn sync(&mut self) -> Result<(MerkleTree, SyncReport), WalletError> {
            let retry = RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            };
            Reconciler::new(&self.chain, &self.pool, DEPTH, 2, retry)
                .run(&mut self.ledger, &mut self.cache, &self.storage)
                .await
        }
    }

    #[tokio::test]
    async fn test_exact_match_confirms_and_drops() {
        let mut h = Harness::new();
        h.chain.deposit_foreign(Fr::from(1u64), 1).unwrap();
        let mine = h.deposit_own(5, 1);
        let mut ghost = h.note(9);
        ghost.leaf_index = Some(7);
        h.ledger.add_note(ghost).unwrap();

        let (tree, report) = h.sync().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Matched);
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(tree.root(), h.chain.recorded_root());

        let note = h.ledger.get(1).unwrap();
        assert_eq!(note.commitment, mine.commitment);
        assert!(note.confirmed_on_chain);
        assert!(note.path().unwrap().verify(&note.commitment, &tree.root()));
        assert_eq!(h.cache.leaves.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_index_corrected() {
        let mut h = Harness::new();
        h.chain.deposit_foreign(Fr::from(1u64), 1).unwrap();
        // claimed at 0, actually landed at 1
        let mine = h.deposit_own(5, 0);

        let (_, report) = h.sync().await.unwrap();
        assert_eq!(report.confirmed, 1);
        assert_eq!(h.ledger.get(1).unwrap().commitment, mine.commitment);
        assert!(h.ledger.get(0).is_none());
    }

    #[tokio::test]
    async fn test_incremental_sync_uses_cursor() {
        let mut h = Harness::new();
        for i in 1..=4u64 {
            h.chain.deposit_foreign(Fr::from(i), 1).unwrap();
        }
        let (_, first) = h.sync().await.unwrap();
        assert_eq!(first.scanned, 4);

        h.chain.deposit_foreign(Fr::from(5u64), 1).unwrap();
        let (tree, second) = h.sync().await.unwrap();
        assert_eq!(second.scanned, 1);
        assert_eq!(second.outcome, SyncOutcome::Matched);
        assert_eq!(tree.leaf_count(), 5);
    }

    #[tokio::test]
    async fn test_root_divergence_distrusts_notes() {
        let mut h = Harness::new();
        h.deposit_own(5, 0);
        h.sync().await.unwrap();
        assert_eq!(h.ledger.balance(), 5);

        let honest = h.chain.recorded_root();
        h.chain.set_recorded_root(Fr::from(123u64));
        let (tree, report) = h.sync().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::RootDivergence);
        assert_eq!(tree.root(), honest);
        assert_eq!(h.ledger.balance(), 0);
        assert_eq!(h.ledger.len(), 1);

        h.chain.set_recorded_root(honest);
        let (_, report) = h.sync().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Matched);
        assert_eq!(h.ledger.balance(), 5);
    }

    #[tokio::test]
    async fn test_missing_leaf_without_fallback_fails() {
        let mut h = Harness::new();
        let mut hidden = None;
        for i in 1..=5u64 {
            let sig = h.chain.deposit_foreign(Fr::from(i), 1).unwrap();
            if i == 3 {
                hidden = Some(sig);
            }
        }
        h.chain.hide_transaction(&hidden.unwrap());

        let err = h.sync().await.unwrap_err();
        assert!(matches!(err, WalletError::MissingLeaf { index: 2 }));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_persisted_cache() {
        let mut h = Harness::new();
        h.chain.deposit_foreign(Fr::from(1u64), 1).unwrap();
        h.chain.deposit_foreign(Fr::from(2u64), 1).unwrap();
        h.sync().await.unwrap();
        let saved = h.cache.clone();

        h.chain.deposit_foreign(Fr::from(3u64), 1).unwrap();
        let lost = h.chain.deposit_foreign(Fr::from(4u64), 1).unwrap();
        h.chain.deposit_foreign(Fr::from(5u64), 1).unwrap();
        h.chain.hide_transaction(&lost);

        let err = h.sync().await.unwrap_err();
        assert!(matches!(err, WalletError::MissingLeaf { index: 3 }));
        assert_eq!(h.cache, saved);
        assert_eq!(LeafCache::load(&h.storage).unwrap(), saved);
    }

    #[tokio::test]
    async fn test_local_note_fills_gap() {
        let mut h = Harness::new();
        h.chain.deposit_foreign(Fr::from(1u64), 1).unwrap();
        let mine = h.note(4);
        let sig = h.chain.deposit_foreign(mine.commitment, 4).unwrap();
        h.chain.deposit_foreign(Fr::from(3u64), 1).unwrap();
        h.chain.hide_transaction(&sig);

        let mut placed = mine.clone();
        let tree = MerkleTree::new(DEPTH).unwrap();
        placed.place(1, tree.empty_path(), tree.root());
        h.ledger.add_note(placed).unwrap();

        let (_, report) = h.sync().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::MatchedAfterRefetch);
        assert!(h.ledger.get(1).unwrap().confirmed_on_chain);
    }

    #[tokio::test]
    async fn test_cached_table_fills_pruned_history() {
        let mut h = Harness::new();
        let first = h.chain.deposit_foreign(Fr::from(1u64), 1).unwrap();
        h.chain.deposit_foreign(Fr::from(2u64), 1).unwrap();
        h.sync().await.unwrap();

        // rpc prunes the oldest transaction and the local table loses an entry
        h.chain.hide_transaction(&first);
        h.chain.deposit_foreign(Fr::from(3u64), 1).unwrap();
        h.cache.leaves.remove(&1);

        let (tree, report) = h.sync().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::MatchedAfterRefetch);
        assert_eq!(tree.root(), h.chain.recorded_root());
    }

    #[tokio::test]
    async fn test_depth_mismatch_rejected() {
        let mut h = Harness::new();
        let retry = RetryPolicy::default();
        let err = Reconciler::new(&h.chain, &h.pool, DEPTH + 1, 10, retry)
            .run(&mut h.ledger, &mut h.cache, &h.storage)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::ReconciliationMismatch(_)));
    }
}
