#![allow(dead_code)]

use std::sync::Arc;

use shroud_privacy::Fr;
use shroud_wallet::storage::SecureStorage;
use shroud_wallet::{
    MemoryChain, MemoryStorage, MockProofTransport, PoolAddresses, ShieldedWallet, WalletConfig,
};

pub const DEPTH: usize = 8;

pub type TestWallet<S = MemoryStorage> = ShieldedWallet<Arc<MemoryChain>, MockProofTransport, S>;

pub fn config() -> WalletConfig {
    let mut config = WalletConfig::default();
    config.tree.depth = DEPTH;
    config.sync.page_size = 4;
    config.sync.retry_base_ms = 1;
    config.submit.confirm_timeout_secs = 2;
    config.submit.confirm_poll_ms = 5;
    config
}

pub fn chain_for(config: &WalletConfig) -> Arc<MemoryChain> {
    let pool = PoolAddresses::derive(
        config.program_id().expect("program id"),
        config.token_mint().expect("mint"),
    );
    Arc::new(MemoryChain::new(pool, config.tree.depth).expect("chain"))
}

pub fn chain() -> Arc<MemoryChain> {
    chain_for(&config())
}

pub fn wallet(chain: &Arc<MemoryChain>, seed: &[u8]) -> TestWallet {
    wallet_with(config(), chain, seed, MemoryStorage::new())
}

pub fn wallet_with<S: SecureStorage>(
    config: WalletConfig,
    chain: &Arc<MemoryChain>,
    seed: &[u8],
    storage: S,
) -> TestWallet<S> {
    ShieldedWallet::new(
        config,
        seed,
        Arc::clone(chain),
        MockProofTransport::new(),
        storage,
    )
    .expect("wallet")
}

/// Commitments that belong to nobody
pub fn foreign(value: u64) -> Fr {
    Fr::from(1_000_000 + value)
}
