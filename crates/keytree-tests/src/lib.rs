//! Integration test suite for keytree.
//!
//! Drives wallets end to end against a real RocksDB store in a temporary
//! directory, with a scripted chain service standing in for the network.

pub mod helpers;
