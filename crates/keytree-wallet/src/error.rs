//! Wallet error types.

use keytree_core::address::Network;
use keytree_core::error::{ChainError, CryptoError, PathError, StoreError};
use thiserror::Error;

/// Errors reported by wallet, ledger, and assembly operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// A wallet with this name already exists.
    #[error("wallet name already exists: {0}")]
    DuplicateWalletName(String),

    /// No wallet matches the given id or name.
    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    /// No key in this wallet matches the given id, address, serialized key, or name.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Malformed derivation path.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// Key depth disagrees with the number of path segments.
    #[error("key depth {depth} does not match path {path}")]
    DepthMismatch { depth: u8, path: String },

    /// Purpose segment of a path differs from the wallet's purpose.
    #[error("path {path} has purpose {found}, wallet uses {expected}")]
    PurposeMismatch { path: String, expected: u32, found: u32 },

    /// Coin type segment of a path differs from the wallet's network.
    #[error("path {path} has coin type {found}, wallet uses {expected}")]
    CointypeMismatch { path: String, expected: u32, found: u32 },

    /// Purpose, coin type, and account segments must be present and hardened.
    #[error("purpose, coin type and account must be hardened in path {0}")]
    UnhardenedPath(String),

    /// An account with this id already exists.
    #[error("account {0} already exists")]
    AccountExists(u32),

    /// No coin-type node exists to derive accounts from.
    #[error("no master key at depth 2 in wallet {0}")]
    MissingMasterKey(String),

    /// The account does not exist and cannot be created.
    #[error("no master key available to create account {account_id}")]
    NoMasterKey { account_id: u32 },

    /// Imported root keys may be at most depth 4.
    #[error("master key depth {0} exceeds the maximum of 4")]
    InvalidMasterKeyDepth(u8),

    /// Requested network differs from the key's network.
    #[error("network mismatch: expected {expected}, key is for {found}")]
    NetworkMismatch { expected: Network, found: Network },

    /// Not enough value in the selectable outputs.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },

    /// No unspent output reaches the confirmation threshold.
    #[error("no spendable outputs in account {account_id} with {min_confirmations} confirmations")]
    NoSpendableOutputs { account_id: u32, min_confirmations: u64 },

    /// An input's owning key is public-only.
    #[error("key {key_id} ({address}) has no private key")]
    MissingPrivateKey { key_id: u64, address: String },

    /// The signed transaction failed codec verification.
    #[error("transaction verification failed")]
    TransactionVerificationFailed,

    /// The requested operation is not supported.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Deleting would discard a funded key.
    #[error("key {key_id} ({address}) still holds {balance}; force deletion to proceed")]
    ForceDeleteRequired { key_id: u64, address: String, balance: u64 },

    /// The chain service did not accept the transaction.
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    /// Invalid monetary amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid configuration value.
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl From<StoreError> for WalletError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateWalletName(name) => WalletError::DuplicateWalletName(name),
            StoreError::WalletNotFound(id) => WalletError::WalletNotFound(id.to_string()),
            StoreError::KeyNotFound(id) => WalletError::KeyNotFound(id.to_string()),
            other => WalletError::Store(other),
        }
    }
}
