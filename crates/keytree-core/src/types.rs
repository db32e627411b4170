//! Persistent wallet records: wallets, key nodes, and tracked outputs.
//!
//! All monetary values are in base units (1 coin = 10^8 units).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::address::Network;

pub type WalletId = u64;
pub type KeyId = u64;

/// A 32-byte hash, displayed, parsed, and serialized as lowercase hex.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// BLAKE3 hash of `data`.
    pub fn digest(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Reference to one output of a transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    pub tx_hash: Hash256,
    pub output_n: u32,
}

impl OutPoint {
    pub fn new(tx_hash: Hash256, output_n: u32) -> Self {
        Self { tx_hash, output_n }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.output_n)
    }
}

/// Whether a key carries private material.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub enum KeyType {
    Private,
    Public,
}

/// A named wallet and its cached aggregate balance.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct WalletRecord {
    pub id: WalletId,
    /// Globally unique.
    pub name: String,
    pub owner: String,
    pub network: Network,
    /// BIP43 purpose shared by every key in the wallet.
    pub purpose: u32,
    /// Root of the wallet's key tree, set once the root node is stored.
    pub main_key_id: Option<KeyId>,
    /// Sum of the owned keys' cached balances as of the last sync.
    pub balance: u64,
    /// Unix seconds.
    pub created_at: i64,
}

/// One key in a wallet's derivation tree.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct KeyNode {
    pub id: KeyId,
    pub wallet_id: WalletId,
    /// The node this key was derived from; `None` for roots and imports.
    pub parent_id: Option<KeyId>,
    pub name: String,
    /// Path components minus one.
    pub depth: u8,
    pub purpose: u32,
    pub account_id: u32,
    /// 0 on the payment branch, 1 on the change branch.
    pub change: u32,
    /// Unhardened child index of this key.
    pub address_index: u32,
    /// Normalized path, always rooted at `m`.
    pub path: String,
    pub address: String,
    pub public_key: Vec<u8>,
    /// Base58Check extended key; private form when `is_private`.
    pub serialized: String,
    pub key_type: KeyType,
    pub is_private: bool,
    pub balance: u64,
}

/// An output owned by one of a wallet's keys.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub wallet_id: WalletId,
    pub key_id: KeyId,
    pub value: u64,
    pub confirmations: u64,
    /// Flips from false to true once, never back.
    pub spent: bool,
    /// Position of the output as reported by the chain service.
    pub index: u64,
    pub script: String,
}

/// An unspent output as reported by a [`ChainService`](crate::traits::ChainService).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChainUtxo {
    pub address: String,
    pub tx_hash: Hash256,
    pub output_n: u32,
    #[serde(default)]
    pub index: u64,
    pub value: u64,
    pub confirmations: u64,
    #[serde(default)]
    pub script: String,
}

impl ChainUtxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_hash, self.output_n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_display_and_parse() {
        let h = Hash256([0xAB; 32]);
        let s = h.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(s.parse::<Hash256>().unwrap(), h);
        assert!("abc".parse::<Hash256>().is_err());
    }

    #[test]
    fn outpoints_order_by_hash_then_index() {
        let a = OutPoint::new(Hash256([1; 32]), 5);
        let b = OutPoint::new(Hash256([1; 32]), 6);
        let c = OutPoint::new(Hash256([2; 32]), 0);
        assert!(a < b && b < c);
        assert!(a.to_string().ends_with(":5"));
    }

    #[test]
    fn chain_utxo_from_json_fixture() {
        let json = format!(
            r#"{{"address":"1Addr","tx_hash":"{}","output_n":1,"value":5000,"confirmations":3}}"#,
            Hash256([0x0C; 32])
        );
        let utxo: ChainUtxo = serde_json::from_str(&json).unwrap();
        assert_eq!(utxo.outpoint(), OutPoint::new(Hash256([0x0C; 32]), 1));
        assert_eq!(utxo.index, 0);
        assert!(utxo.script.is_empty());
    }

    #[test]
    fn records_encode_with_bincode() {
        let utxo = Utxo {
            outpoint: OutPoint::new(Hash256([9; 32]), 0),
            wallet_id: 1,
            key_id: 4,
            value: 100,
            confirmations: 6,
            spent: false,
            index: 0,
            script: String::new(),
        };
        let bytes = bincode::encode_to_vec(&utxo, bincode::config::standard()).unwrap();
        let (back, _): (Utxo, _) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(back, utxo);
    }
}
