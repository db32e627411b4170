//! End-to-end tests for keytree.
//!
//! Each test builds wallets on a RocksDB store in a temporary directory and
//! drives them through the public API: key tree growth, account and address
//! allocation, ledger sync against a scripted chain, transaction assembly,
//! broadcast, and deletion.

use std::sync::Arc;

use keytree_core::constants::MAX_KEY_DEPTH;
use keytree_core::error::ChainError;
use keytree_core::path;
use keytree_core::traits::TxCodec;
use keytree_core::tx::Ed25519TxCodec;
use keytree_core::types::Hash256;
use keytree_tests::helpers::*;
use keytree_wallet::builder::TransactionBuilder;
use keytree_wallet::error::WalletError;
use keytree_wallet::ledger::SyncScope;
use keytree_wallet::testing::{MockChain, RejectingCodec};
use keytree_wallet::wallet::{KeyFilter, Wallet, delete_wallet, wallet_exists};

fn key_count(wallet: &Wallet) -> usize {
    wallet.keys(&KeyFilter::default()).unwrap().len()
}

// ======================================================================
// Path algebra
// ======================================================================

#[test]
fn parse_full_address_path() {
    let parsed = path::parse("m/44'/1'/0'/0/5").unwrap();
    assert!(parsed.is_private);
    assert_eq!(parsed.purpose.as_deref(), Some("44'"));
    assert_eq!(parsed.coin_type.as_deref(), Some("1'"));
    assert_eq!(parsed.account.as_deref(), Some("0'"));
    assert_eq!(parsed.change.as_deref(), Some("0"));
    assert_eq!(parsed.address_index.as_deref(), Some("5"));
}

// ======================================================================
// Key tree
// ======================================================================

#[test]
fn deriving_same_path_twice_reuses_node() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("reuse");

    let first = wallet.key_for_path("m/44'/1'/0'/0/7", None, 0, 0, true).unwrap();
    let count = key_count(&wallet);
    let second = wallet.key_for_path("m/44h/1h/0h/0/7", None, 0, 0, true).unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(key_count(&wallet), count);
}

#[test]
fn existing_prefix_is_not_rederived() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("reroot");
    let before = key_count(&wallet);
    let payments = wallet.key_for_path("m/44'/1'/0'/0", None, 0, 0, true).unwrap();
    assert_eq!(key_count(&wallet), before);

    let leaf = wallet.key_for_path("m/44'/1'/0'/0/7", None, 0, 0, true).unwrap();
    assert_eq!(key_count(&wallet), before + 1);
    assert_eq!(leaf.node().parent_id, Some(payments.id()));

    let deep = wallet.key_for_path("m/44'/1'/0'/2/3", None, 0, 0, true).unwrap();
    assert_eq!(key_count(&wallet), before + 3);
    assert_eq!(deep.node().change, 2);
    assert_eq!(deep.node().address_index, 3);
    let branch = wallet.key(deep.node().parent_id.unwrap()).unwrap();
    assert_eq!(branch.path(), "m/44'/1'/0'/2");
}

#[test]
fn lookups_share_one_handle() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("identity");
    let key = wallet.new_key(Some("savings"), None, 0, MAX_KEY_DEPTH).unwrap();

    let by_id = wallet.key(key.id()).unwrap();
    let by_address = wallet.key(key.address()).unwrap();
    let by_name = wallet.key("savings").unwrap();
    assert!(Arc::ptr_eq(&key, &by_id));
    assert!(Arc::ptr_eq(&by_id, &by_address));
    assert!(Arc::ptr_eq(&by_address, &by_name));
}

#[test]
fn strict_paths_must_match_wallet() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("strict");

    let err = wallet.key_for_path("m/49'/1'/0'/0/0", None, 0, 0, true).unwrap_err();
    assert!(matches!(err, WalletError::PurposeMismatch { expected: 44, found: 49, .. }));

    let err = wallet.key_for_path("m/44'/1'/0/0/0", None, 0, 0, true).unwrap_err();
    assert!(matches!(err, WalletError::UnhardenedPath(_)));

    let before = key_count(&wallet);
    wallet.key_for_path("m/44'/1'/0/0/0", None, 0, 0, false).unwrap();
    assert!(key_count(&wallet) > before);
}

// ======================================================================
// Accounts and addresses
// ======================================================================

#[test]
fn account_ids_increase_and_never_repeat() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("accounts");

    let one = wallet.new_account(None, None).unwrap();
    let two = wallet.new_account(None, Some("travel")).unwrap();
    assert_eq!(one.node().account_id, 1);
    assert_eq!(two.node().account_id, 2);
    assert_eq!(two.path(), "m/44'/1'/2'");

    let err = wallet.new_account(Some(1), None).unwrap_err();
    assert_eq!(err, WalletError::AccountExists(1));

    let ids: Vec<u32> = wallet.accounts().unwrap().iter().map(|a| a.account_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[test]
fn address_indexes_count_per_branch() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("indexes");

    let indexes: Vec<u32> = (0..3)
        .map(|_| wallet.new_key(None, None, 0, MAX_KEY_DEPTH).unwrap().node().address_index)
        .collect();
    assert_eq!(indexes, vec![0, 1, 2]);

    let change = wallet.new_key_change(None, None).unwrap();
    assert_eq!(change.node().address_index, 0);
    assert_eq!(change.path(), "m/44'/1'/0'/1/0");

    wallet.new_account(None, None).unwrap();
    let other = wallet.new_key(None, Some(1), 0, MAX_KEY_DEPTH).unwrap();
    assert_eq!(other.node().address_index, 0);
    assert_eq!(other.name(), "Key 0");
}

// ======================================================================
// Ledger
// ======================================================================

#[test]
fn sync_is_a_full_resync() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("resync");
    let key = wallet.new_key(None, None, 0, MAX_KEY_DEPTH).unwrap();
    let chain = MockChain::new();
    fund(
        &chain,
        serde_json::json!([
            { "address": key.address(), "tx_hash": Hash256([1; 32]).to_string(), "output_n": 0,
              "index": 0, "value": 40_000, "confirmations": 6, "script": "" },
            { "address": key.address(), "tx_hash": Hash256([2; 32]).to_string(), "output_n": 1,
              "index": 1, "value": 60_000, "confirmations": 2, "script": "" },
        ]),
    );

    let report = wallet.sync_utxos(&chain, SyncScope::default()).unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(wallet.balance(), 100_000);
    assert_eq!(key.balance(), 100_000);

    chain.clear_utxos();
    chain.add_utxo(key.address(), Hash256([2; 32]), 1, 60_000, 3);
    let report = wallet.sync_utxos(&chain, SyncScope::default()).unwrap();
    assert_eq!(report.removed, 2);
    assert_eq!(report.inserted, 1);
    assert_eq!(wallet.balance(), 60_000);

    let utxos = wallet.utxos(None, 0).unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].confirmations, 3);
}

#[test]
fn chain_failure_changes_nothing() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("offline");
    let key = wallet.new_key(None, None, 0, MAX_KEY_DEPTH).unwrap();
    let chain = MockChain::new();
    chain.add_utxo(key.address(), Hash256([3; 32]), 0, 75_000, 6);
    wallet.sync_utxos(&chain, SyncScope::default()).unwrap();

    chain.clear_utxos();
    chain.fail_with(ChainError::Unavailable("timeout".into()));
    let err = wallet.sync_utxos(&chain, SyncScope::default()).unwrap_err();
    assert_eq!(err, WalletError::Chain(ChainError::Unavailable("timeout".into())));
    assert_eq!(wallet.balance(), 75_000);
    assert_eq!(wallet.utxos(None, 0).unwrap().len(), 1);
}

// ======================================================================
// Transactions
// ======================================================================

#[test]
fn change_returns_to_fresh_change_address() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("payer");
    let key = wallet.new_key(None, None, 0, MAX_KEY_DEPTH).unwrap();
    let chain = MockChain::new();
    chain.add_utxo(key.address(), Hash256([4; 32]), 0, 150_000, 10);
    wallet.sync_utxos(&chain, SyncScope::default()).unwrap();

    let draft = TransactionBuilder::new()
        .add_output(recipient(0x11), 100_000)
        .fee(30_000)
        .build(&mut wallet, &Ed25519TxCodec)
        .unwrap();

    let change = draft.change.clone().unwrap();
    assert_eq!(change.amount, 20_000);
    assert_eq!(draft.total_input, 150_000);
    assert!(Ed25519TxCodec.verify(&draft.tx));
    let change_key = wallet.key(change.key_id).unwrap();
    assert_eq!(change_key.path(), "m/44'/1'/0'/1/0");
    assert_ne!(change.address, key.address());
}

#[test]
fn failed_verification_leaves_no_change_key() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("rejected");
    let key = wallet.new_key(None, None, 0, MAX_KEY_DEPTH).unwrap();
    let chain = MockChain::new();
    chain.add_utxo(key.address(), Hash256([5; 32]), 0, 150_000, 10);
    wallet.sync_utxos(&chain, SyncScope::default()).unwrap();
    let before = key_count(&wallet);

    let err = TransactionBuilder::new()
        .add_output(recipient(0x12), 100_000)
        .build(&mut wallet, &RejectingCodec)
        .unwrap_err();
    assert_eq!(err, WalletError::TransactionVerificationFailed);
    assert_eq!(key_count(&wallet), before);
    assert!(wallet.change_keys(0).unwrap().is_empty());
}

#[test]
fn broadcast_marks_inputs_spent_for_good() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("sender");
    let key = wallet.new_key(None, None, 0, MAX_KEY_DEPTH).unwrap();
    let chain = MockChain::new();
    chain.add_utxo(key.address(), Hash256([6; 32]), 0, 150_000, 10);
    wallet.sync_utxos(&chain, SyncScope::default()).unwrap();

    let txid = wallet
        .send(&recipient(0x13), 100_000, None, Some(30_000), &chain, &Ed25519TxCodec)
        .unwrap();
    assert!(!txid.is_empty());
    assert_eq!(chain.broadcasts().len(), 1);
    assert!(wallet.utxos(None, 0).unwrap().is_empty());

    // A lagging chain still reports the spent output next to the new change.
    let change = wallet.change_keys(0).unwrap().remove(0);
    chain.add_utxo(&change.address, Hash256([7; 32]), 1, 20_000, 1);
    let report = wallet.sync_utxos(&chain, SyncScope::default()).unwrap();
    assert_eq!(report.skipped, 1);
    let unspent = wallet.utxos(None, 0).unwrap();
    assert_eq!(unspent.len(), 1);
    assert_eq!(unspent[0].value, 20_000);
}

#[test]
fn spending_needs_confirmed_outputs() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("pending");
    let key = wallet.new_key(None, None, 0, MAX_KEY_DEPTH).unwrap();
    let chain = MockChain::new();
    chain.add_utxo(key.address(), Hash256([8; 32]), 0, 150_000, 1);
    wallet.sync_utxos(&chain, SyncScope::default()).unwrap();

    let err = wallet
        .send(&recipient(0x14), 10_000, None, None, &chain, &Ed25519TxCodec)
        .unwrap_err();
    assert_eq!(err, WalletError::NoSpendableOutputs { account_id: 0, min_confirmations: 4 });
    assert!(chain.broadcasts().is_empty());
}

// ======================================================================
// Lifecycle
// ======================================================================

#[test]
fn funded_wallet_needs_force_delete() {
    let env = TestEnv::new();
    let mut wallet = env.create_wallet("doomed");
    let key = wallet.new_key(None, None, 0, MAX_KEY_DEPTH).unwrap();
    let chain = MockChain::new();
    chain.add_utxo(key.address(), Hash256([9; 32]), 0, 5_000, 6);
    wallet.sync_utxos(&chain, SyncScope::default()).unwrap();
    let keys = key_count(&wallet);
    let id = wallet.id();
    drop(wallet);

    let err = delete_wallet(env.store.as_ref(), "doomed", false).unwrap_err();
    assert!(matches!(err, WalletError::ForceDeleteRequired { key_id, balance: 5_000, .. } if key_id == key.id()));
    assert!(wallet_exists(env.store.as_ref(), id).unwrap());

    let deleted = delete_wallet(env.store.as_ref(), "doomed", true).unwrap();
    assert_eq!(deleted.keys, keys);
    assert_eq!(deleted.utxos, 1);
    assert!(!wallet_exists(env.store.as_ref(), id).unwrap());
    assert!(env.store.key(key.id()).unwrap().is_none());
}

#[test]
fn state_survives_reopen() {
    let env = TestEnv::new();
    let (address, keys) = {
        let mut wallet = env.create_wallet("durable");
        let key = wallet.new_key(Some("kept"), None, 0, MAX_KEY_DEPTH).unwrap();
        let chain = MockChain::new();
        chain.add_utxo(key.address(), Hash256([10; 32]), 0, 42_000, 6);
        wallet.sync_utxos(&chain, SyncScope::default()).unwrap();
        (key.address().to_string(), key_count(&wallet))
    };

    let env = env.reopen();
    let mut wallet = env.open_wallet("durable");
    assert_eq!(wallet.balance(), 42_000);
    assert_eq!(key_count(&wallet), keys);
    let key = wallet.key("kept").unwrap();
    assert_eq!(key.address(), address);
    assert_eq!(key.balance(), 42_000);
    assert_eq!(wallet.new_key(None, None, 0, MAX_KEY_DEPTH).unwrap().node().address_index, 1);
}
