//! Persistence contract for wallets, key nodes, and tracked outputs.
//!
//! Implementations must make every method atomic: a check-then-write method
//! such as [`WalletStore::insert_key`] or [`WalletStore::apply_sync`] either
//! commits in full or not at all, and concurrent callers never observe a
//! half-applied batch.

use crate::address::Network;
use crate::error::StoreError;
use crate::types::{KeyId, KeyNode, KeyType, OutPoint, Utxo, WalletId, WalletRecord};

/// Fields of a wallet before an id is assigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewWallet {
    pub name: String,
    pub owner: String,
    pub network: Network,
    pub purpose: u32,
}

/// Fields of a key node before an id is assigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewKeyNode {
    pub wallet_id: WalletId,
    pub parent_id: Option<KeyId>,
    pub name: String,
    pub depth: u8,
    pub purpose: u32,
    pub account_id: u32,
    pub change: u32,
    pub address_index: u32,
    pub path: String,
    pub address: String,
    pub public_key: Vec<u8>,
    pub serialized: String,
    pub key_type: KeyType,
    pub is_private: bool,
}

impl NewKeyNode {
    pub fn into_node(self, id: KeyId) -> KeyNode {
        KeyNode {
            id,
            wallet_id: self.wallet_id,
            parent_id: self.parent_id,
            name: self.name,
            depth: self.depth,
            purpose: self.purpose,
            account_id: self.account_id,
            change: self.change,
            address_index: self.address_index,
            path: self.path,
            address: self.address,
            public_key: self.public_key,
            serialized: self.serialized,
            key_type: self.key_type,
            is_private: self.is_private,
            balance: 0,
        }
    }
}

/// Which existing record satisfied an insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyMatch {
    Serialized,
    PublicKey,
}

/// Outcome of [`WalletStore::insert_key`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyInsert {
    Inserted(KeyNode),
    Existing { node: KeyNode, matched: KeyMatch },
}

impl KeyInsert {
    pub fn node(&self) -> &KeyNode {
        match self {
            KeyInsert::Inserted(node) | KeyInsert::Existing { node, .. } => node,
        }
    }

    pub fn into_node(self) -> KeyNode {
        match self {
            KeyInsert::Inserted(node) | KeyInsert::Existing { node, .. } => node,
        }
    }
}

/// One full re-sync of a wallet's ledger, applied as a unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncBatch {
    pub wallet_id: WalletId,
    /// Outputs to drop. Rows already marked spent are kept.
    pub remove: Vec<OutPoint>,
    /// Outputs to add. Outpoints still stored after removal are skipped.
    pub insert: Vec<Utxo>,
    /// New cached balance per key.
    pub key_balances: Vec<(KeyId, u64)>,
    /// New cached wallet balance.
    pub wallet_balance: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub removed: usize,
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalletDeletion {
    pub keys: usize,
    pub utxos: usize,
}

/// Durable storage for wallets.
pub trait WalletStore: Send + Sync {
    // --- wallets ---

    /// Insert a wallet. Fails with [`StoreError::DuplicateWalletName`] if the
    /// name is taken.
    fn create_wallet(&self, wallet: NewWallet) -> Result<WalletRecord, StoreError>;

    fn wallet(&self, id: WalletId) -> Result<Option<WalletRecord>, StoreError>;

    fn wallet_by_name(&self, name: &str) -> Result<Option<WalletRecord>, StoreError>;

    /// All wallets ordered by id.
    fn wallets(&self) -> Result<Vec<WalletRecord>, StoreError>;

    /// Overwrite a wallet row, keeping the name index consistent.
    fn update_wallet(&self, wallet: &WalletRecord) -> Result<(), StoreError>;

    /// Delete a wallet with every key and output it owns.
    fn delete_wallet(&self, id: WalletId) -> Result<WalletDeletion, StoreError>;

    // --- keys ---

    /// Insert a key unless the wallet already holds the same serialized key
    /// or public key, in which case the existing node is returned. A different
    /// key on the same path is a [`StoreError::PathConflict`].
    fn insert_key(&self, key: NewKeyNode) -> Result<KeyInsert, StoreError>;

    fn key(&self, id: KeyId) -> Result<Option<KeyNode>, StoreError>;

    fn key_by_path(&self, wallet_id: WalletId, path: &str) -> Result<Option<KeyNode>, StoreError>;

    fn key_by_address(&self, wallet_id: WalletId, address: &str) -> Result<Option<KeyNode>, StoreError>;

    fn key_by_serialized(&self, wallet_id: WalletId, serialized: &str) -> Result<Option<KeyNode>, StoreError>;

    /// All keys of a wallet ordered by id.
    fn keys(&self, wallet_id: WalletId) -> Result<Vec<KeyNode>, StoreError>;

    // --- ledger ---

    /// All outputs of a wallet, spent or not, ordered by outpoint.
    fn utxos(&self, wallet_id: WalletId) -> Result<Vec<Utxo>, StoreError>;

    fn apply_sync(&self, batch: SyncBatch) -> Result<SyncOutcome, StoreError>;

    /// Flag outputs as spent, returning how many changed.
    fn mark_spent(&self, wallet_id: WalletId, outpoints: &[OutPoint]) -> Result<usize, StoreError>;
}
