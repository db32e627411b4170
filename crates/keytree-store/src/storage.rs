//! RocksDB-backed wallet storage.
//!
//! Wallets, key nodes, and outputs live in their own column families next to
//! the secondary indexes the wallet layer queries by (name, path, serialized
//! key, public key, address, per-wallet membership). Every mutation is built
//! as one [`WriteBatch`] while holding the store's write lock, so
//! check-then-insert sequences are atomic with respect to other callers and
//! readers never see a partially applied change.

use std::collections::HashSet;
use std::path::Path;

use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

use keytree_core::error::StoreError;
use keytree_core::store::{
    KeyInsert, KeyMatch, NewKeyNode, NewWallet, SyncBatch, SyncOutcome, WalletDeletion, WalletStore,
};
use keytree_core::types::{KeyId, KeyNode, OutPoint, Utxo, WalletId, WalletRecord};

// --- Column family names ---

const CF_WALLETS: &str = "wallets";
const CF_WALLET_NAMES: &str = "wallet_names";
const CF_KEYS: &str = "keys";
const CF_WALLET_KEYS: &str = "wallet_keys";
const CF_KEY_PATHS: &str = "key_paths";
const CF_KEY_SERIALIZED: &str = "key_serialized";
const CF_KEY_PUBKEYS: &str = "key_pubkeys";
const CF_KEY_ADDRESSES: &str = "key_addresses";
const CF_UTXOS: &str = "utxos";
const CF_WALLET_UTXOS: &str = "wallet_utxos";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[
    CF_WALLETS,
    CF_WALLET_NAMES,
    CF_KEYS,
    CF_WALLET_KEYS,
    CF_KEY_PATHS,
    CF_KEY_SERIALIZED,
    CF_KEY_PUBKEYS,
    CF_KEY_ADDRESSES,
    CF_UTXOS,
    CF_WALLET_UTXOS,
    CF_METADATA,
];

// --- Metadata keys ---

const META_NEXT_WALLET_ID: &[u8] = b"next_wallet_id";
const META_NEXT_KEY_ID: &[u8] = b"next_key_id";

const OUTPOINT_KEY_LEN: usize = 36;

/// RocksDB-backed [`WalletStore`].
pub struct RocksStore {
    db: DB,
    /// Serializes every read-check-write sequence.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a database at `path`, creating missing column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        tracing::info!(path = %path.as_ref().display(), "opened wallet store");
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        for name in ALL_CFS {
            let cf = self.cf_handle(name)?;
            self.db
                .flush_cf(cf)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    // --- Internal helpers ---

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Storage(format!("missing column family: {name}")))
    }

    fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf_handle(cf_name)?;
        self.db
            .get_cf(cf, key)
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn get_decoded<T: bincode::Decode<()>>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>, StoreError> {
        self.get(cf_name, key)?.map(|bytes| decode(&bytes)).transpose()
    }

    fn get_id(&self, cf_name: &str, key: &[u8]) -> Result<Option<u64>, StoreError> {
        self.get(cf_name, key)?.map(|bytes| decode_id(&bytes)).transpose()
    }

    /// Keys of `cf_name` starting with `prefix`, in order.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>, StoreError> {
        let cf = self.cf_handle(cf_name)?;
        let mut keys = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward)) {
            let (key, _) = item.map_err(|e| StoreError::Storage(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Reserve the next id under `counter`, staging the bump in `batch`.
    fn next_id(&self, batch: &mut WriteBatch, counter: &[u8]) -> Result<u64, StoreError> {
        let id = self.get_id(CF_METADATA, counter)?.unwrap_or(1);
        batch.put_cf(self.cf_handle(CF_METADATA)?, counter, (id + 1).to_be_bytes());
        Ok(id)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn key_via_index(&self, cf_name: &str, wallet_id: WalletId, value: &[u8]) -> Result<Option<KeyNode>, StoreError> {
        match self.get_id(cf_name, &scoped_key(wallet_id, value))? {
            Some(id) => self.key(id),
            None => Ok(None),
        }
    }

    fn put_key(&self, batch: &mut WriteBatch, node: &KeyNode) -> Result<(), StoreError> {
        let id = node.id.to_be_bytes();
        batch.put_cf(self.cf_handle(CF_KEYS)?, id, encode(node)?);
        batch.put_cf(self.cf_handle(CF_WALLET_KEYS)?, scoped_key(node.wallet_id, &id), []);
        batch.put_cf(self.cf_handle(CF_KEY_PATHS)?, scoped_key(node.wallet_id, node.path.as_bytes()), id);
        batch.put_cf(self.cf_handle(CF_KEY_SERIALIZED)?, scoped_key(node.wallet_id, node.serialized.as_bytes()), id);
        batch.put_cf(self.cf_handle(CF_KEY_PUBKEYS)?, scoped_key(node.wallet_id, &node.public_key), id);
        batch.put_cf(self.cf_handle(CF_KEY_ADDRESSES)?, scoped_key(node.wallet_id, node.address.as_bytes()), id);
        Ok(())
    }

    fn delete_key(&self, batch: &mut WriteBatch, node: &KeyNode) -> Result<(), StoreError> {
        let id = node.id.to_be_bytes();
        batch.delete_cf(self.cf_handle(CF_KEYS)?, id);
        batch.delete_cf(self.cf_handle(CF_WALLET_KEYS)?, scoped_key(node.wallet_id, &id));
        batch.delete_cf(self.cf_handle(CF_KEY_PATHS)?, scoped_key(node.wallet_id, node.path.as_bytes()));
        batch.delete_cf(self.cf_handle(CF_KEY_SERIALIZED)?, scoped_key(node.wallet_id, node.serialized.as_bytes()));
        batch.delete_cf(self.cf_handle(CF_KEY_PUBKEYS)?, scoped_key(node.wallet_id, &node.public_key));
        batch.delete_cf(self.cf_handle(CF_KEY_ADDRESSES)?, scoped_key(node.wallet_id, node.address.as_bytes()));
        Ok(())
    }

    fn put_utxo(&self, batch: &mut WriteBatch, utxo: &Utxo) -> Result<(), StoreError> {
        let key = outpoint_key(&utxo.outpoint);
        batch.put_cf(self.cf_handle(CF_UTXOS)?, key, encode(utxo)?);
        batch.put_cf(self.cf_handle(CF_WALLET_UTXOS)?, scoped_key(utxo.wallet_id, &key), []);
        Ok(())
    }

    fn delete_utxo(&self, batch: &mut WriteBatch, utxo: &Utxo) -> Result<(), StoreError> {
        let key = outpoint_key(&utxo.outpoint);
        batch.delete_cf(self.cf_handle(CF_UTXOS)?, key);
        batch.delete_cf(self.cf_handle(CF_WALLET_UTXOS)?, scoped_key(utxo.wallet_id, &key));
        Ok(())
    }

    fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, StoreError> {
        self.get_decoded(CF_UTXOS, &outpoint_key(outpoint))
    }
}

impl WalletStore for RocksStore {
    fn create_wallet(&self, wallet: NewWallet) -> Result<WalletRecord, StoreError> {
        let _guard = self.write_lock.lock();
        if self.get(CF_WALLET_NAMES, wallet.name.as_bytes())?.is_some() {
            return Err(StoreError::DuplicateWalletName(wallet.name));
        }

        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, META_NEXT_WALLET_ID)?;
        let record = WalletRecord {
            id,
            name: wallet.name,
            owner: wallet.owner,
            network: wallet.network,
            purpose: wallet.purpose,
            main_key_id: None,
            balance: 0,
            created_at: chrono::Utc::now().timestamp(),
        };
        batch.put_cf(self.cf_handle(CF_WALLETS)?, id.to_be_bytes(), encode(&record)?);
        batch.put_cf(self.cf_handle(CF_WALLET_NAMES)?, record.name.as_bytes(), id.to_be_bytes());
        self.write(batch)?;

        tracing::info!(wallet_id = id, name = %record.name, "created wallet");
        Ok(record)
    }

    fn wallet(&self, id: WalletId) -> Result<Option<WalletRecord>, StoreError> {
        self.get_decoded(CF_WALLETS, &id.to_be_bytes())
    }

    fn wallet_by_name(&self, name: &str) -> Result<Option<WalletRecord>, StoreError> {
        match self.get_id(CF_WALLET_NAMES, name.as_bytes())? {
            Some(id) => self.wallet(id),
            None => Ok(None),
        }
    }

    fn wallets(&self) -> Result<Vec<WalletRecord>, StoreError> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let mut result = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Storage(e.to_string()))?;
            result.push(decode(&value)?);
        }
        Ok(result)
    }

    fn update_wallet(&self, wallet: &WalletRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let current = self
            .wallet(wallet.id)?
            .ok_or(StoreError::WalletNotFound(wallet.id))?;

        let mut batch = WriteBatch::default();
        if current.name != wallet.name {
            if let Some(other) = self.get_id(CF_WALLET_NAMES, wallet.name.as_bytes())? {
                if other != wallet.id {
                    return Err(StoreError::DuplicateWalletName(wallet.name.clone()));
                }
            }
            let names = self.cf_handle(CF_WALLET_NAMES)?;
            batch.delete_cf(names, current.name.as_bytes());
            batch.put_cf(names, wallet.name.as_bytes(), wallet.id.to_be_bytes());
        }
        batch.put_cf(self.cf_handle(CF_WALLETS)?, wallet.id.to_be_bytes(), encode(wallet)?);
        self.write(batch)
    }

    fn delete_wallet(&self, id: WalletId) -> Result<WalletDeletion, StoreError> {
        let _guard = self.write_lock.lock();
        let record = self.wallet(id)?.ok_or(StoreError::WalletNotFound(id))?;

        let mut batch = WriteBatch::default();
        let keys = self.keys(id)?;
        for node in &keys {
            self.delete_key(&mut batch, node)?;
        }
        let utxos = self.utxos(id)?;
        for utxo in &utxos {
            self.delete_utxo(&mut batch, utxo)?;
        }
        batch.delete_cf(self.cf_handle(CF_WALLETS)?, id.to_be_bytes());
        batch.delete_cf(self.cf_handle(CF_WALLET_NAMES)?, record.name.as_bytes());
        self.write(batch)?;

        tracing::info!(
            wallet_id = id,
            name = %record.name,
            keys = keys.len(),
            utxos = utxos.len(),
            "deleted wallet"
        );
        Ok(WalletDeletion {
            keys: keys.len(),
            utxos: utxos.len(),
        })
    }

    fn insert_key(&self, key: NewKeyNode) -> Result<KeyInsert, StoreError> {
        let _guard = self.write_lock.lock();
        if self.wallet(key.wallet_id)?.is_none() {
            return Err(StoreError::WalletNotFound(key.wallet_id));
        }
        if let Some(node) = self.key_via_index(CF_KEY_SERIALIZED, key.wallet_id, key.serialized.as_bytes())? {
            return Ok(KeyInsert::Existing { node, matched: KeyMatch::Serialized });
        }
        if let Some(node) = self.key_via_index(CF_KEY_PUBKEYS, key.wallet_id, &key.public_key)? {
            return Ok(KeyInsert::Existing { node, matched: KeyMatch::PublicKey });
        }
        if let Some(existing) = self.get_id(CF_KEY_PATHS, &scoped_key(key.wallet_id, key.path.as_bytes()))? {
            return Err(StoreError::PathConflict {
                wallet_id: key.wallet_id,
                path: key.path,
                existing,
            });
        }

        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, META_NEXT_KEY_ID)?;
        let node = key.into_node(id);
        self.put_key(&mut batch, &node)?;
        self.write(batch)?;

        tracing::debug!(key_id = id, wallet_id = node.wallet_id, path = %node.path, "stored key");
        Ok(KeyInsert::Inserted(node))
    }

    fn key(&self, id: KeyId) -> Result<Option<KeyNode>, StoreError> {
        self.get_decoded(CF_KEYS, &id.to_be_bytes())
    }

    fn key_by_path(&self, wallet_id: WalletId, path: &str) -> Result<Option<KeyNode>, StoreError> {
        self.key_via_index(CF_KEY_PATHS, wallet_id, path.as_bytes())
    }

    fn key_by_address(&self, wallet_id: WalletId, address: &str) -> Result<Option<KeyNode>, StoreError> {
        self.key_via_index(CF_KEY_ADDRESSES, wallet_id, address.as_bytes())
    }

    fn key_by_serialized(&self, wallet_id: WalletId, serialized: &str) -> Result<Option<KeyNode>, StoreError> {
        self.key_via_index(CF_KEY_SERIALIZED, wallet_id, serialized.as_bytes())
    }

    fn keys(&self, wallet_id: WalletId) -> Result<Vec<KeyNode>, StoreError> {
        let prefix = wallet_id.to_be_bytes();
        let mut result = Vec::new();
        for entry in self.scan_prefix(CF_WALLET_KEYS, &prefix)? {
            let id = decode_id(&entry[prefix.len()..])?;
            let node = self.key(id)?.ok_or(StoreError::KeyNotFound(id))?;
            result.push(node);
        }
        Ok(result)
    }

    fn utxos(&self, wallet_id: WalletId) -> Result<Vec<Utxo>, StoreError> {
        let prefix = wallet_id.to_be_bytes();
        let mut result = Vec::new();
        for entry in self.scan_prefix(CF_WALLET_UTXOS, &prefix)? {
            let key = &entry[prefix.len()..];
            match self.get_decoded::<Utxo>(CF_UTXOS, key)? {
                Some(utxo) => result.push(utxo),
                None => return Err(StoreError::Storage(format!("dangling output index in wallet {wallet_id}"))),
            }
        }
        Ok(result)
    }

    fn apply_sync(&self, sync: SyncBatch) -> Result<SyncOutcome, StoreError> {
        let _guard = self.write_lock.lock();
        let mut wallet = self
            .wallet(sync.wallet_id)?
            .ok_or(StoreError::WalletNotFound(sync.wallet_id))?;

        let mut batch = WriteBatch::default();
        let mut outcome = SyncOutcome::default();

        let mut removed = HashSet::new();
        for outpoint in &sync.remove {
            if let Some(utxo) = self.utxo(outpoint)? {
                if utxo.wallet_id == sync.wallet_id && !utxo.spent {
                    self.delete_utxo(&mut batch, &utxo)?;
                    removed.insert(outpoint.clone());
                }
            }
        }
        outcome.removed = removed.len();

        let mut staged = HashSet::new();
        for utxo in &sync.insert {
            let stored = self.utxo(&utxo.outpoint)?.is_some() && !removed.contains(&utxo.outpoint);
            if stored || !staged.insert(utxo.outpoint.clone()) {
                outcome.skipped += 1;
                continue;
            }
            self.put_utxo(&mut batch, utxo)?;
            outcome.inserted += 1;
        }

        for (key_id, balance) in &sync.key_balances {
            let mut node = self.key(*key_id)?.ok_or(StoreError::KeyNotFound(*key_id))?;
            node.balance = *balance;
            batch.put_cf(self.cf_handle(CF_KEYS)?, key_id.to_be_bytes(), encode(&node)?);
        }

        wallet.balance = sync.wallet_balance;
        batch.put_cf(self.cf_handle(CF_WALLETS)?, wallet.id.to_be_bytes(), encode(&wallet)?);
        self.write(batch)?;

        tracing::debug!(
            wallet_id = wallet.id,
            removed = outcome.removed,
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            "applied ledger sync"
        );
        Ok(outcome)
    }

    fn mark_spent(&self, wallet_id: WalletId, outpoints: &[OutPoint]) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        let mut changed = 0;
        for outpoint in outpoints {
            if let Some(mut utxo) = self.utxo(outpoint)? {
                if utxo.wallet_id == wallet_id && !utxo.spent {
                    utxo.spent = true;
                    self.put_utxo(&mut batch, &utxo)?;
                    changed += 1;
                }
            }
        }
        self.write(batch)?;
        Ok(changed)
    }
}

// --- Encoding ---

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode_id(bytes: &[u8]) -> Result<u64, StoreError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Codec(format!("invalid id length {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

/// `wallet_id (BE) || tail`, so one wallet's entries sort together.
fn scoped_key(wallet_id: WalletId, tail: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + tail.len());
    key.extend_from_slice(&wallet_id.to_be_bytes());
    key.extend_from_slice(tail);
    key
}

/// `tx_hash || output_n (BE)`.
fn outpoint_key(outpoint: &OutPoint) -> [u8; OUTPOINT_KEY_LEN] {
    let mut key = [0u8; OUTPOINT_KEY_LEN];
    key[..32].copy_from_slice(outpoint.tx_hash.as_bytes());
    key[32..].copy_from_slice(&outpoint.output_n.to_be_bytes());
    key
}
