//! # keytree-store
//! RocksDB implementation of [`keytree_core::store::WalletStore`].

pub mod storage;

pub use storage::RocksStore;
