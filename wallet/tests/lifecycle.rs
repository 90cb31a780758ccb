mod common;

use rand::rngs::OsRng;
use shroud_privacy::{Fr, Note, empty_roots, poseidon};
use shroud_wallet::{ImportError, OperationKind, OperationStatus, WalletError};
use solana_sdk::pubkey::Pubkey;

use common::{chain, chain_for, config, foreign, wallet, wallet_with};
use shroud_wallet::MemoryStorage;

#[tokio::test]
async fn shield_then_unshield_leaves_one_change_note() {
    let chain = chain();
    let alice = wallet(&chain, b"alice");

    let shielded = alice.shield(5).await.expect("shield");
    assert_eq!(shielded.leaf_index, 0);
    assert!(shielded.note.confirmed_on_chain);
    assert_eq!(alice.balance().await, 5);

    let recipient = Pubkey::new_from_array([42u8; 32]);
    let receipt = alice.unshield(recipient, 2).await.expect("unshield");

    let notes = alice.notes().await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].amount, 3);
    assert!(notes[0].confirmed_on_chain);
    assert_eq!(notes[0].leaf_index, Some(1));
    assert_eq!(alice.balance().await, 3);

    let zero = Fr::from(0u64);
    assert_eq!(
        receipt.dummy_commitment,
        poseidon::hash(&[zero, zero, zero, alice.token_tag()])
    );
    assert!(receipt.dummy_nullifier.is_some());
    assert_eq!(chain.balance_of(&recipient), 2);
    assert_eq!(chain.vault_balance(), 3);
    // the fixed dummy is never a leaf
    assert_eq!(chain.leaf_count(), 2);

    let op = alice.last_operation().await.expect("operation");
    assert_eq!(op.kind, OperationKind::Unshield);
    assert_eq!(op.status, OperationStatus::Confirmed);
    assert_eq!(op.signature, Some(receipt.signature));
}

#[tokio::test]
async fn transfer_pays_recipient_who_imports_the_note() {
    let chain = chain();
    let alice = wallet(&chain, b"alice");
    let bob = wallet(&chain, b"bob");

    alice.shield(10).await.expect("shield");
    let receipt = alice
        .transfer(bob.identity().owner(), 4)
        .await
        .expect("transfer");

    assert_eq!(receipt.payment_note.amount, 4);
    assert_eq!(receipt.change_note.as_ref().map(|n| n.amount), Some(6));
    assert_eq!(alice.balance().await, 6);
    assert!(chain.is_nullifier_spent(&receipt.nullifiers[0]));

    let imported = bob
        .import_note(&receipt.payment_export)
        .await
        .expect("import");
    assert_eq!(imported.amount, 4);
    assert!(imported.confirmed_on_chain);
    assert_eq!(bob.balance().await, 4);

    let out = Pubkey::new_from_array([9u8; 32]);
    bob.unshield(out, 4).await.expect("bob unshield");
    assert_eq!(bob.balance().await, 0);
    assert_eq!(chain.balance_of(&out), 4);
}

#[tokio::test]
async fn transfer_to_self_keeps_both_outputs() {
    let chain = chain();
    let alice = wallet(&chain, b"alice");

    alice.shield(8).await.expect("shield");
    alice
        .transfer(alice.identity().owner(), 3)
        .await
        .expect("transfer");

    let mut amounts: Vec<u64> = alice.notes().await.iter().map(|n| n.amount).collect();
    amounts.sort();
    assert_eq!(amounts, vec![3, 5]);
    assert_eq!(alice.balance().await, 8);
}

#[tokio::test]
async fn dummy_input_nullifiers_differ_between_transfers() {
    let chain = chain();
    let alice = wallet(&chain, b"alice");
    let bob = wallet(&chain, b"bob");

    alice.shield(5).await.expect("shield");
    alice.shield(7).await.expect("shield");

    let first = alice
        .transfer(bob.identity().owner(), 3)
        .await
        .expect("first transfer");
    let second = alice
        .transfer(bob.identity().owner(), 2)
        .await
        .expect("second transfer");

    let a = first.dummy_nullifier.expect("first transfer padded");
    let b = second.dummy_nullifier.expect("second transfer padded");
    assert_ne!(a, b);
    assert_eq!(alice.balance().await, 7);
}

#[tokio::test]
async fn export_import_round_trip_on_second_instance() {
    let chain = chain();
    let first = wallet(&chain, b"shared seed");
    let receipt = first.shield(5).await.expect("shield");
    let exported = first.export_note(&receipt.note).expect("export");

    let second = wallet(&chain, b"shared seed");
    let imported = second.import_note(&exported).await.expect("import");
    assert_eq!(imported.commitment, receipt.note.commitment);
    assert_eq!(imported.leaf_index, Some(0));
    assert_eq!(second.balance().await, 5);

    let again = second.import_note(&exported).await.unwrap_err();
    assert!(matches!(
        again,
        WalletError::Import(ImportError::AlreadyPresent { leaf_index: 0 })
    ));

    let stranger = wallet(&chain, b"stranger");
    let wrong = stranger.import_note(&exported).await.unwrap_err();
    assert!(matches!(wrong, WalletError::Import(ImportError::WrongOwner)));
}

#[tokio::test]
async fn import_of_note_not_on_chain_is_refused() {
    let chain = chain();
    let first = wallet(&chain, b"shared seed");
    let receipt = first.shield(5).await.expect("shield");

    let mut ahead = receipt.note.clone();
    ahead.leaf_index = Some(3);
    let exported = first.export_note(&ahead).expect("export");

    let second = wallet(&chain, b"shared seed");
    let err = second.import_note(&exported).await.unwrap_err();
    assert!(matches!(
        err,
        WalletError::Import(ImportError::NotYetOnChain { leaf_index: 3 })
    ));
}

#[tokio::test]
async fn roots_agree_across_instances() {
    let mut config = config();
    config.tree.depth = 2;
    let chain = chain_for(&config);
    for value in 1..=3u64 {
        chain.deposit_foreign(Fr::from(value), 1).expect("deposit");
    }

    let a = wallet_with(config.clone(), &chain, b"a", MemoryStorage::new());
    let b = wallet_with(config, &chain, b"b", MemoryStorage::new());
    a.sync().await.expect("sync a");
    b.sync().await.expect("sync b");

    let empty = Fr::from(0u64);
    let expected = poseidon::hash_pair(
        &poseidon::hash_pair(&Fr::from(1u64), &Fr::from(2u64)),
        &poseidon::hash_pair(&Fr::from(3u64), &empty),
    );
    assert_eq!(a.root().await, expected);
    assert_eq!(b.root().await, expected);
    assert_eq!(chain.recorded_root(), expected);
}

#[tokio::test]
async fn depth_three_root_over_three_deposits() {
    let mut config = config();
    config.tree.depth = 3;
    let chain = chain_for(&config);
    for value in 1..=3u64 {
        chain.deposit_foreign(Fr::from(value), 1).expect("deposit");
    }

    let alice = wallet_with(config, &chain, b"alice", MemoryStorage::new());
    alice.sync().await.expect("sync");

    let empty = empty_roots(3);
    let lower = poseidon::hash_pair(
        &poseidon::hash_pair(&Fr::from(1u64), &Fr::from(2u64)),
        &poseidon::hash_pair(&Fr::from(3u64), &empty[0]),
    );
    let expected = poseidon::hash_pair(&lower, &empty[2]);
    assert_eq!(alice.root().await, expected);
    assert_eq!(chain.recorded_root(), expected);
}

#[tokio::test]
async fn import_over_a_different_held_note_is_refused() {
    let chain = chain();
    let alice = wallet(&chain, b"alice");
    alice.shield(5).await.expect("shield");

    let mut other = Note::new(5, alice.identity().owner(), alice.token_tag(), &mut OsRng);
    other.leaf_index = Some(0);
    let exported = alice.export_note(&other).expect("export");

    let err = alice.import_note(&exported).await.unwrap_err();
    assert!(matches!(err, WalletError::LedgerCorruption(_)));
    assert_eq!(alice.notes().await.len(), 1);
    assert_eq!(alice.balance().await, 5);
}

#[tokio::test]
async fn timed_out_shield_is_recovered_by_sync() {
    let mut config = config();
    config.submit.confirm_timeout_secs = 0;
    let chain = chain_for(&config);
    let alice = wallet_with(config, &chain, b"alice", MemoryStorage::new());

    chain.withhold_confirmations(true);
    let err = alice.shield(5).await.unwrap_err();
    assert!(matches!(err, WalletError::ConfirmationTimeout { .. }));
    assert_eq!(alice.balance().await, 0);
    assert_eq!(alice.pending_submissions().await.len(), 1);
    assert_eq!(chain.vault_balance(), 5);

    chain.withhold_confirmations(false);
    let report = alice.sync().await.expect("sync");
    assert_eq!(report.confirmed, 1);
    assert!(alice.pending_submissions().await.is_empty());
    assert_eq!(alice.balance().await, 5);

    let notes = alice.notes().await;
    let path = notes[0].path().expect("path");
    assert!(path.verify(&notes[0].commitment, &chain.recorded_root()));
}

#[tokio::test]
async fn timed_out_transfer_settles_from_history() {
    let mut config = config();
    config.submit.confirm_timeout_secs = 0;
    let chain = chain_for(&config);
    let alice = wallet_with(config, &chain, b"alice", MemoryStorage::new());
    alice.shield(5).await.expect("shield");

    chain.withhold_confirmations(true);
    let err = alice.transfer(Fr::from(1u64), 2).await.unwrap_err();
    assert!(matches!(err, WalletError::ConfirmationTimeout { .. }));
    // the spent input stays locked while the outcome is unknown
    assert_eq!(alice.balance().await, 0);

    let report = alice.sync().await.expect("sync");
    assert_eq!(report.leaf_count, 3);
    assert!(alice.pending_submissions().await.is_empty());
    let notes = alice.notes().await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].amount, 3);
    assert_eq!(notes[0].leaf_index, Some(2));
    assert_eq!(alice.balance().await, 3);
}

#[tokio::test]
async fn timed_out_failed_transfer_releases_inputs() {
    let mut config = config();
    config.submit.confirm_timeout_secs = 0;
    let chain = chain_for(&config);
    let alice = wallet_with(config, &chain, b"alice", MemoryStorage::new());
    alice.shield(5).await.expect("shield");

    chain.fail_next_on_chain("custom program error: 0x1");
    chain.withhold_confirmations(true);
    alice.transfer(Fr::from(1u64), 2).await.unwrap_err();

    // nothing landed and the chain has not said why yet
    alice.sync().await.expect("sync");
    assert_eq!(alice.pending_submissions().await.len(), 1);
    assert_eq!(alice.balance().await, 0);

    chain.withhold_confirmations(false);
    alice.sync().await.expect("sync");
    assert!(alice.pending_submissions().await.is_empty());
    assert_eq!(alice.balance().await, 5);
    alice.transfer(Fr::from(1u64), 2).await.expect("retry");
    assert_eq!(alice.balance().await, 3);
}

#[tokio::test]
async fn concurrent_calls_are_serialized() {
    let chain = chain();
    let alice = wallet(&chain, b"alice");
    chain.deposit_foreign(foreign(1), 1).expect("deposit");

    let (a, b) = tokio::join!(alice.shield(3), alice.shield(4));
    let mut indices = vec![
        a.expect("first").leaf_index,
        b.expect("second").leaf_index,
    ];
    indices.sort();
    assert_eq!(indices, vec![1, 2]);
    assert_eq!(alice.balance().await, 7);
    assert_eq!(alice.root().await, chain.recorded_root());
}
