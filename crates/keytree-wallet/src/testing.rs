//! In-memory collaborators for tests.
//!
//! Compiled for this crate's own tests and, through the `testing` feature,
//! for downstream test suites.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use keytree_core::address::Network;
use keytree_core::error::{ChainError, CryptoError};
use keytree_core::traits::{ChainService, TxCodec};
use keytree_core::tx::{Ed25519TxCodec, Transaction};
use keytree_core::types::{ChainUtxo, Hash256, OutPoint};

/// Scripted [`ChainService`] that records broadcasts.
#[derive(Default)]
pub struct MockChain {
    utxos: Mutex<Vec<ChainUtxo>>,
    balance: Mutex<u64>,
    failure: Mutex<Option<ChainError>>,
    broadcast_reply: Mutex<Option<Result<String, ChainError>>>,
    broadcasts: Mutex<Vec<Vec<u8>>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an unspent output for `address`.
    pub fn add_utxo(&self, address: &str, tx_hash: Hash256, output_n: u32, value: u64, confirmations: u64) {
        let mut utxos = self.utxos.lock();
        let index = utxos.len() as u64;
        utxos.push(ChainUtxo {
            address: address.to_string(),
            tx_hash,
            output_n,
            index,
            value,
            confirmations,
            script: String::new(),
        });
    }

    pub fn clear_utxos(&self) {
        self.utxos.lock().clear();
    }

    pub fn set_balance(&self, balance: u64) {
        *self.balance.lock() = balance;
    }

    /// Make every query fail with `error` until [`recover`](Self::recover).
    pub fn fail_with(&self, error: ChainError) {
        *self.failure.lock() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Answer broadcasts with `reply` instead of the transaction's hash.
    pub fn reply_to_broadcast(&self, reply: Result<String, ChainError>) {
        *self.broadcast_reply.lock() = Some(reply);
    }

    /// Raw transactions received so far.
    pub fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.broadcasts.lock().clone()
    }

    fn check(&self) -> Result<(), ChainError> {
        match self.failure.lock().as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl ChainService for MockChain {
    fn get_balance(&self, _addresses: &BTreeSet<String>) -> Result<u64, ChainError> {
        self.check()?;
        Ok(*self.balance.lock())
    }

    fn get_utxos(&self, addresses: &BTreeSet<String>) -> Result<Vec<ChainUtxo>, ChainError> {
        self.check()?;
        Ok(self
            .utxos
            .lock()
            .iter()
            .filter(|u| addresses.contains(&u.address))
            .cloned()
            .collect())
    }

    fn broadcast(&self, raw_tx: &[u8]) -> Result<String, ChainError> {
        self.check()?;
        self.broadcasts.lock().push(raw_tx.to_vec());
        match self.broadcast_reply.lock().clone() {
            Some(reply) => reply,
            None => Ok(Hash256::digest(raw_tx).to_string()),
        }
    }
}

/// [`Ed25519TxCodec`] whose verification always fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectingCodec;

impl TxCodec for RejectingCodec {
    fn new_transaction(&self, network: Network) -> Transaction {
        Ed25519TxCodec.new_transaction(network)
    }

    fn add_output(&self, tx: &mut Transaction, value: u64, address: &str) -> Result<usize, CryptoError> {
        Ed25519TxCodec.add_output(tx, value, address)
    }

    fn add_input(&self, tx: &mut Transaction, outpoint: &OutPoint, public_key: &[u8]) -> Result<usize, CryptoError> {
        Ed25519TxCodec.add_input(tx, outpoint, public_key)
    }

    fn sign(&self, tx: &mut Transaction, private_key: &[u8; 32], input_id: usize) -> Result<(), CryptoError> {
        Ed25519TxCodec.sign(tx, private_key, input_id)
    }

    fn verify(&self, _tx: &Transaction) -> bool {
        false
    }

    fn serialize(&self, tx: &Transaction) -> Result<Vec<u8>, CryptoError> {
        Ed25519TxCodec.serialize(tx)
    }
}
