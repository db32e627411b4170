//! # keytree-core
//! Foundation types and traits for hierarchical-deterministic wallets.
//!
//! Holds everything the storage and wallet crates agree on: records,
//! derivation path algebra, error enums, and the service traits behind which
//! key derivation, transaction encoding, chain access, and persistence live.
//! Reference implementations of [`traits::KeyDerivation`] and
//! [`traits::TxCodec`] are provided in [`hdkey`] and [`tx`].

pub mod address;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod hdkey;
pub mod path;
pub mod store;
pub mod traits;
pub mod tx;
pub mod types;
