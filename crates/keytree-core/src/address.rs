//! Network parameters and Base58Check address encoding.
//!
//! An address is `version || hash || checksum` encoded in Base58, where the
//! 20-byte hash is the truncated BLAKE3 hash of the raw Ed25519 public key and
//! the checksum is the first four bytes of double SHA-256 over the rest.
//! Extended keys reuse the same Base58Check framing (see [`crate::hdkey`]).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::crypto::address_hash;
use crate::error::AddressError;
use crate::types::KeyType;

/// Length of the public-key hash carried by an address.
pub const ADDRESS_HASH_LEN: usize = 20;

const CHECKSUM_LEN: usize = 4;

/// Network a wallet and its keys belong to.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
    bincode::Encode, bincode::Decode,
)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    /// BIP44 coin type registered for this network.
    pub fn bip44_coin_type(&self) -> u32 {
        match self {
            Network::Mainnet => 0,
            Network::Testnet => 1,
        }
    }

    /// Leading byte of an encoded address.
    pub fn address_version(&self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6f,
        }
    }

    pub fn from_address_version(version: u8) -> Result<Self, AddressError> {
        match version {
            0x00 => Ok(Network::Mainnet),
            0x6f => Ok(Network::Testnet),
            v => Err(AddressError::InvalidVersion(v)),
        }
    }

    /// Four-byte prefix of a serialized extended key.
    pub fn key_version(&self, key_type: KeyType) -> [u8; 4] {
        match (self, key_type) {
            (Network::Mainnet, KeyType::Private) => [0x04, 0x88, 0xAD, 0xE4],
            (Network::Mainnet, KeyType::Public) => [0x04, 0x88, 0xB2, 0x1E],
            (Network::Testnet, KeyType::Private) => [0x04, 0x35, 0x83, 0x94],
            (Network::Testnet, KeyType::Public) => [0x04, 0x35, 0x87, 0xCF],
        }
    }

    /// Reverse of [`key_version`](Self::key_version).
    pub fn from_key_version(version: [u8; 4]) -> Option<(Self, KeyType)> {
        [Network::Mainnet, Network::Testnet]
            .into_iter()
            .flat_map(|n| [(n, KeyType::Private), (n, KeyType::Public)])
            .find(|(n, t)| n.key_version(*t) == version)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            _ => Err(AddressError::UnknownNetwork(s.to_string())),
        }
    }
}

/// First four bytes of double SHA-256.
pub fn checksum(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(Sha256::digest(data));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// Base58-encode `payload` with a checksum appended.
pub fn encode_check(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum(payload));
    bs58::encode(data).into_string()
}

/// Decode a Base58Check string, verifying and stripping the checksum.
pub fn decode_check(s: &str) -> Result<Vec<u8>, AddressError> {
    let mut data = bs58::decode(s)
        .into_vec()
        .map_err(|e| AddressError::InvalidBase58(e.to_string()))?;
    if data.len() < CHECKSUM_LEN {
        return Err(AddressError::InvalidLength { got: data.len(), expected: CHECKSUM_LEN });
    }
    let split = data.len() - CHECKSUM_LEN;
    if checksum(&data[..split]) != data[split..] {
        return Err(AddressError::InvalidChecksum);
    }
    data.truncate(split);
    Ok(data)
}

/// A pay-to-public-key-hash address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    hash: [u8; ADDRESS_HASH_LEN],
}

impl Address {
    pub fn from_hash(hash: [u8; ADDRESS_HASH_LEN], network: Network) -> Self {
        Self { network, hash }
    }

    pub fn from_public_key(public_key: &[u8; 32], network: Network) -> Self {
        Self::from_hash(address_hash(public_key), network)
    }

    pub fn hash(&self) -> &[u8; ADDRESS_HASH_LEN] {
        &self.hash
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(1 + ADDRESS_HASH_LEN);
        payload.push(self.network.address_version());
        payload.extend_from_slice(&self.hash);
        encode_check(&payload)
    }

    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let payload = decode_check(s)?;
        if payload.len() != 1 + ADDRESS_HASH_LEN {
            return Err(AddressError::InvalidLength {
                got: payload.len(),
                expected: 1 + ADDRESS_HASH_LEN,
            });
        }
        let network = Network::from_address_version(payload[0])?;
        let mut hash = [0u8; ADDRESS_HASH_LEN];
        hash.copy_from_slice(&payload[1..]);
        Ok(Self { network, hash })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}
