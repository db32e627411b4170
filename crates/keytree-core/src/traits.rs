//! Trait interfaces for the services a wallet depends on.
//!
//! - [`KeyDerivation`] — extended-key arithmetic and encoding ([`crate::hdkey`] implements)
//! - [`TxCodec`] — transaction construction, signing, and encoding ([`crate::tx`] implements)
//! - [`ChainService`] — balances, unspent outputs, and broadcast (supplied by the caller)
//!
//! Persistence sits behind [`WalletStore`](crate::store::WalletStore).

use std::collections::BTreeSet;

use crate::address::Network;
use crate::error::{ChainError, CryptoError};
use crate::hdkey::{ExtendedKey, MAX_SEED_LEN};
use crate::tx::Transaction;
use crate::types::{ChainUtxo, OutPoint};

/// Extended-key derivation and encoding.
pub trait KeyDerivation: Send + Sync {
    /// Master key for `seed`.
    fn master_from_seed(&self, seed: &[u8], network: Network) -> Result<ExtendedKey, CryptoError>;

    /// Master key from a fresh random seed.
    fn generate_master(&self, network: Network) -> Result<ExtendedKey, CryptoError> {
        use rand::RngCore;
        use zeroize::Zeroize;
        let mut seed = [0u8; MAX_SEED_LEN];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        let key = self.master_from_seed(&seed, network);
        seed.zeroize();
        key
    }

    /// Child `index` of `parent`, hardened or not.
    fn derive_child(&self, parent: &ExtendedKey, index: u32, hardened: bool) -> Result<ExtendedKey, CryptoError>;

    /// Receiving address of `key` on its own network.
    fn public_address(&self, key: &ExtendedKey) -> String;

    /// Portable string form, private when the key carries a secret.
    fn serialize(&self, key: &ExtendedKey) -> String;

    /// Parse a string produced by [`serialize`](Self::serialize). The network
    /// and key type are read from the encoding.
    fn from_serialized(&self, serialized: &str) -> Result<ExtendedKey, CryptoError>;
}

/// Remote view of the chain.
///
/// Implementations talk to whatever backend the caller chooses; the wallet
/// only ever passes address sets and raw transaction bytes.
pub trait ChainService: Send + Sync {
    /// Total confirmed balance across `addresses`.
    fn get_balance(&self, addresses: &BTreeSet<String>) -> Result<u64, ChainError>;

    /// Every unspent output paying one of `addresses`.
    fn get_utxos(&self, addresses: &BTreeSet<String>) -> Result<Vec<ChainUtxo>, ChainError>;

    /// Submit a signed transaction and return its id.
    fn broadcast(&self, raw_tx: &[u8]) -> Result<String, ChainError>;
}

/// Transaction construction and signing.
pub trait TxCodec: Send + Sync {
    fn new_transaction(&self, network: Network) -> Transaction;

    /// Append an output, returning its position.
    fn add_output(&self, tx: &mut Transaction, value: u64, address: &str) -> Result<usize, CryptoError>;

    /// Append an input spending `outpoint` with the owner's public key,
    /// returning the input id used for signing.
    fn add_input(&self, tx: &mut Transaction, outpoint: &OutPoint, public_key: &[u8]) -> Result<usize, CryptoError>;

    /// Sign input `input_id` with `private_key`.
    fn sign(&self, tx: &mut Transaction, private_key: &[u8; 32], input_id: usize) -> Result<(), CryptoError>;

    /// True when every input carries a valid signature over the transaction.
    fn verify(&self, tx: &Transaction) -> bool;

    /// Wire encoding handed to [`ChainService::broadcast`].
    fn serialize(&self, tx: &Transaction) -> Result<Vec<u8>, CryptoError>;
}
