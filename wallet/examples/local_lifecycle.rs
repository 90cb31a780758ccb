//! Full shield / transfer / import / unshield cycle against the in-process
//! pool program and the mock prover.
//!
//! RUST_LOG=debug cargo run -p shroud-wallet --example local_lifecycle

use std::sync::Arc;

use anyhow::Result;
use log::info;
use shroud_wallet::{
    MemoryChain, MemoryStorage, MockProofTransport, PoolAddresses, ShieldedWallet, WalletConfig,
};
use solana_sdk::pubkey::Pubkey;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = WalletConfig::default();
    config.apply_overrides(|key| std::env::var(key).ok());

    let pool = PoolAddresses::derive(config.program_id()?, config.token_mint()?);
    let chain = Arc::new(MemoryChain::new(pool, config.tree.depth)?);

    let alice = ShieldedWallet::new(
        config.clone(),
        b"alice demo seed",
        Arc::clone(&chain),
        MockProofTransport::new(),
        MemoryStorage::new(),
    )?;
    let bob = ShieldedWallet::new(
        config,
        b"bob demo seed",
        Arc::clone(&chain),
        MockProofTransport::new(),
        MemoryStorage::new(),
    )?;

    let shielded = alice.shield(1_000).await?;
    info!("alice shielded 1000 at leaf {}", shielded.leaf_index);

    let paid = alice.transfer(bob.identity().owner(), 400).await?;
    info!("alice paid bob 400 in {}", paid.signature);

    let imported = bob.import_note(&paid.payment_export).await?;
    info!("bob imported a note of {} at leaf {:?}", imported.amount, imported.leaf_index);

    let recipient = Pubkey::new_from_array([7u8; 32]);
    bob.unshield(recipient, 150).await?;

    info!(
        "balances: alice {}, bob {}, public {} | vault {} | {} leaves",
        alice.balance().await,
        bob.balance().await,
        chain.balance_of(&recipient),
        chain.vault_balance(),
        chain.leaf_count()
    );
    Ok(())
}
