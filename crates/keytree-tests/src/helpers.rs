//! Shared helpers for the integration tests.

use std::path::PathBuf;
use std::sync::Arc;

use keytree_core::address::{Address, Network};
use keytree_core::hdkey::Ed25519Derivation;
use keytree_core::store::WalletStore;
use keytree_core::traits::KeyDerivation;
use keytree_core::types::{ChainUtxo, Hash256, OutPoint, Utxo};
use keytree_store::RocksStore;
use keytree_wallet::config::WalletConfig;
use keytree_wallet::testing::MockChain;
use keytree_wallet::wallet::{CreateOptions, Wallet};
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// A RocksDB store in a temporary directory.
pub struct TestEnv {
    pub store: Arc<dyn WalletStore>,
    pub deriver: Arc<dyn KeyDerivation>,
    pub config: WalletConfig,
    dir: tempfile::TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let config = WalletConfig {
            data_dir: dir.path().to_path_buf(),
            network: Network::Testnet,
            ..WalletConfig::default()
        };
        let store: Arc<dyn WalletStore> = Arc::new(RocksStore::open(config.db_path()).unwrap());
        Self {
            store,
            deriver: Arc::new(Ed25519Derivation),
            config,
            dir,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.config.db_path()
    }

    /// Close the database and open it again. Every `Wallet` built on the
    /// old handle must be dropped first.
    pub fn reopen(self) -> Self {
        let Self { store, deriver, config, dir } = self;
        drop(store);
        let store: Arc<dyn WalletStore> = Arc::new(RocksStore::open(config.db_path()).unwrap());
        Self { store, deriver, config, dir }
    }

    pub fn create_wallet(&self, name: &str) -> Wallet {
        Wallet::create(
            self.store.clone(),
            self.deriver.clone(),
            self.config.clone(),
            CreateOptions::new(name),
        )
        .unwrap()
    }

    pub fn open_wallet(&self, name: &str) -> Wallet {
        Wallet::open(self.store.clone(), self.deriver.clone(), self.config.clone(), name).unwrap()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A testnet address no wallet owns.
pub fn recipient(seed: u8) -> String {
    Address::from_hash([seed; 20], Network::Testnet).encode()
}

/// Load chain-service outputs from a JSON fixture into `chain`.
pub fn fund(chain: &MockChain, fixture: serde_json::Value) {
    let utxos: Vec<ChainUtxo> = serde_json::from_value(fixture).unwrap();
    for u in utxos {
        chain.add_utxo(&u.address, u.tx_hash, u.output_n, u.value, u.confirmations);
    }
}

/// An unspent output of `value` for coin selection tests.
pub fn utxo(seed: u8, output_n: u32, value: u64) -> Utxo {
    Utxo {
        outpoint: OutPoint::new(Hash256([seed; 32]), output_n),
        wallet_id: 1,
        key_id: 1,
        value,
        confirmations: 6,
        spent: false,
        index: 0,
        script: String::new(),
    }
}
