//! # keytree-wallet — hierarchical-deterministic wallet manager.
//!
//! Builds BIP44-style key trees on top of a [`keytree_core::store::WalletStore`],
//! tracks unspent outputs reported by a chain service, and assembles signed
//! spend transactions with change returned to fresh change-branch keys.
//!
//! # Modules
//!
//! - [`error`] — `WalletError` enum
//! - [`config`] — Wallet defaults, overridable from the environment
//! - [`keys`] — Key handles and the per-wallet key ring
//! - [`wallet`] — Wallet lifecycle, accounts, and key tree operations
//! - [`ledger`] — UTXO synchronisation and balances
//! - [`coin_selection`] — Input selection
//! - [`builder`] — Transaction builder, signing, and broadcast

pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod error;
pub mod keys;
pub mod ledger;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod wallet;

// Re-exports for convenient access
pub use builder::{ChangeOutput, DraftTransaction, Recipient, SelectedInput, TransactionBuilder};
pub use coin_selection::{CoinSelection, CoinSelector};
pub use config::WalletConfig;
pub use error::WalletError;
pub use keys::{KeyHandle, KeyQuery, KeyRing, KeyScope, PreviewKey};
pub use ledger::{SyncReport, SyncScope};
pub use wallet::{CreateOptions, KeyFilter, Wallet, WalletRef, delete_wallet, list_wallets, wallet_exists};
