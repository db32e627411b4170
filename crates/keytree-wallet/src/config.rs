//! Wallet configuration.
//!
//! [`WalletConfig`] carries every default the wallet layer would otherwise
//! bake in: the network for new wallets, the BIP43 purpose, the first
//! account id, the fallback fee, and the spend confirmation threshold. It is
//! passed explicitly to [`Wallet`](crate::Wallet) sessions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use keytree_core::address::Network;
use keytree_core::constants::{DEFAULT_MIN_CONFIRMATIONS, DEFAULT_PURPOSE, FALLBACK_FEE};

use crate::error::WalletError;

/// Configuration shared by wallet sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Root directory for persistent data.
    pub data_dir: PathBuf,
    /// Network for wallets created without key material.
    pub network: Network,
    /// BIP43 purpose for new wallets.
    pub purpose: u32,
    /// Account bootstrapped when a wallet is created from a master key.
    pub default_account_id: u32,
    /// Fee used when a transaction does not name one, in base units.
    pub fallback_fee: u64,
    /// Confirmations an output needs before it is spendable.
    pub min_confirmations: u64,
    /// Log level filter string (e.g. "info", "keytree_wallet=debug").
    pub log_level: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keytree");

        Self {
            data_dir,
            network: Network::default(),
            purpose: DEFAULT_PURPOSE,
            default_account_id: 0,
            fallback_fee: FALLBACK_FEE,
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            log_level: "info".to_string(),
        }
    }
}

impl WalletConfig {
    /// Path to the RocksDB wallet database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("wallets")
    }

    /// Defaults overridden by `KEYTREE_*` environment variables.
    pub fn from_env() -> Result<Self, WalletError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable:
    /// `KEYTREE_DATA_DIR`, `KEYTREE_NETWORK`, `KEYTREE_PURPOSE`,
    /// `KEYTREE_ACCOUNT`, `KEYTREE_FALLBACK_FEE`, `KEYTREE_MIN_CONFIRMATIONS`
    /// and `KEYTREE_LOG`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WalletError> {
        let mut cfg = Self::default();
        if let Some(dir) = lookup("KEYTREE_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(network) = lookup("KEYTREE_NETWORK") {
            cfg.network = network
                .parse()
                .map_err(|e| WalletError::Config(format!("KEYTREE_NETWORK: {e}")))?;
        }
        if let Some(v) = lookup("KEYTREE_PURPOSE") {
            cfg.purpose = parse_var("KEYTREE_PURPOSE", &v)?;
        }
        if let Some(v) = lookup("KEYTREE_ACCOUNT") {
            cfg.default_account_id = parse_var("KEYTREE_ACCOUNT", &v)?;
        }
        if let Some(v) = lookup("KEYTREE_FALLBACK_FEE") {
            cfg.fallback_fee = parse_var("KEYTREE_FALLBACK_FEE", &v)?;
        }
        if let Some(v) = lookup("KEYTREE_MIN_CONFIRMATIONS") {
            cfg.min_confirmations = parse_var("KEYTREE_MIN_CONFIRMATIONS", &v)?;
        }
        if let Some(level) = lookup("KEYTREE_LOG") {
            cfg.log_level = level;
        }
        Ok(cfg)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, WalletError> {
    value
        .trim()
        .parse()
        .map_err(|_| WalletError::Config(format!("{name}: invalid value {value:?}")))
}
