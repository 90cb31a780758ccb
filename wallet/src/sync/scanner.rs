//! History Scanner
//!
//! Walks the tree account's signature history and recovers the commitment
//! appended at each leaf index.
//!
//! ```text
//! signatures (newest first, paged) ──▶ reverse ──▶ oldest → newest
//!                                                    │
//!   per transaction:  skip failed / missing          ▼
//!                     decode pool instruction   leaves_appended()
//!                     "SHROUD_LEAF:<first>:<n>" ──▶ index of first leaf
//!                     (no log: next sequential index)
//! ```

use std::collections::BTreeMap;

use log::{debug, warn};
use shroud_privacy::Fr;
use solana_sdk::signature::Signature;

use crate::chain::instruction::parse_leaf_log;
use crate::chain::{ChainClient, PoolAddresses, PoolInstruction, RetryPolicy, retry_with_backoff};
use crate::error::WalletError;

/// Leaves recovered from one pass over the history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub leaves: BTreeMap<u64, Fr>,
    /// Newest signature covered by this pass
    pub newest: Option<Signature>,
    /// Transactions inspected
    pub scanned: usize,
}

pub struct HistoryScanner<'a, C: ChainClient> {
    chain: &'a C,
    pool: &'a PoolAddresses,
    page_size: usize,
    retry: RetryPolicy,
}

impl<'a, C: ChainClient> HistoryScanner<'a, C> {
    pub fn new(
        chain: &'a C,
        pool: &'a PoolAddresses,
        page_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            chain,
            pool,
            page_size: page_size.max(1),
            retry,
        }
    }

    /// Scan everything newer than `until`
    ///
    /// `next_index` is the first leaf index not accounted for by the history
    /// before `until`. It seeds sequential assignment when a transaction
    /// carries no leaf log.
    pub async fn scan(
        &self,
        until: Option<Signature>,
        next_index: u64,
    ) -> Result<ScanResult, WalletError> {
        let signatures = self.collect_signatures(until).await?;
        let mut result = ScanResult {
            newest: signatures.first().copied().or(until),
            ..ScanResult::default()
        };

        let mut next_index = next_index;
        for signature in signatures.iter().rev() {
            result.scanned += 1;

            let tx = retry_with_backoff(&self.retry, "fetch transaction", || {
                self.chain.transaction(signature)
            })
            .await?;
            let Some(tx) = tx else {
                warn!("Transaction {signature} is missing from history");
                continue;
            };
            if tx.failed {
                continue;
            }

            let mut logged_first = parse_leaf_log(&tx.logs);
            for raw in tx.instructions.iter().filter(|ix| ix.program_id == self.pool.program_id) {
                let instruction = match PoolInstruction::decode(&raw.data) {
                    Ok(instruction) => instruction,
                    Err(e) => {
                        warn!("Skipping undecodable pool instruction in {signature}: {e}");
                        continue;
                    }
                };

                let appended = instruction.leaves_appended();
                let first = match logged_first.take() {
                    Some((first, count)) if count == appended.len() as u64 => first,
                    Some((first, count)) => {
                        warn!(
                            "Leaf log in {signature} reports {count} leaves at {first}, \
                             instruction appends {}",
                            appended.len()
                        );
                        next_index
                    }
                    None => next_index,
                };

                for (offset, commitment) in appended.into_iter().enumerate() {
                    let index = first + offset as u64;
                    if let Some(previous) = result.leaves.insert(index, commitment) {
                        if previous != commitment {
                            warn!("History assigns two commitments to leaf {index}");
                        }
                    }
                    next_index = next_index.max(index + 1);
                }
            }
        }

        debug!(
            "Scanned {} transactions, recovered {} leaves",
            result.scanned,
            result.leaves.len()
        );
        Ok(result)
    }

    /// Page through signatures newer than `until`, newest first
    async fn collect_signatures(
        &self,
        until: Option<Signature>,
    ) -> Result<Vec<Signature>, WalletError> {
        let mut collected = Vec::new();
        let mut before = None;

        loop {
            let page = retry_with_backoff(&self.retry, "fetch signatures", || {
                self.chain
                    .signatures(&self.pool.tree, before, until, self.page_size)
            })
            .await?;

            let page_len = page.len();
            collected.extend(page.iter().filter(|info| !info.failed).map(|info| info.signature));

            match page.last() {
                Some(last) if page_len >= self.page_size => before = Some(last.signature),
                _ => break,
            }
        }
        Ok(collected)
    }
}
