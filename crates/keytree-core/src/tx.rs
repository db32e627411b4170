//! Transactions and the reference [`TxCodec`].
//!
//! # Signing scheme
//!
//! Each input is signed over a BLAKE3 sighash committing to:
//! - network and version
//! - every input outpoint (tx hash + output number)
//! - every output (value + address string)
//! - the index of the input being signed
//!
//! Signatures and public keys are excluded so inputs can be signed in any order.

use serde::{Deserialize, Serialize};

use crate::address::{Address, Network};
use crate::crypto::{KeyPair, PublicKey};
use crate::error::{AddressError, CryptoError};
use crate::traits::TxCodec;
use crate::types::{Hash256, OutPoint};

pub const TX_VERSION: u32 = 1;

/// An input spending a tracked output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    pub outpoint: OutPoint,
    /// Ed25519 public key of the owner (32 bytes).
    pub public_key: Vec<u8>,
    /// Ed25519 signature (64 bytes), empty until signed.
    pub signature: Vec<u8>,
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    pub value: u64,
    pub address: String,
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    pub network: Network,
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// BLAKE3 hash of the canonical encoding.
    pub fn txid(&self) -> Result<Hash256, CryptoError> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        Ok(Hash256::digest(&bytes))
    }
}

/// Compute the signing hash for input `input_index`.
pub fn signing_hash(tx: &Transaction, input_index: usize) -> Result<Hash256, CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let mut data = Vec::new();
    data.push(tx.network.address_version());
    data.extend_from_slice(&tx.version.to_le_bytes());

    data.extend_from_slice(&(tx.inputs.len() as u64).to_le_bytes());
    for input in &tx.inputs {
        data.extend_from_slice(input.outpoint.tx_hash.as_bytes());
        data.extend_from_slice(&input.outpoint.output_n.to_le_bytes());
    }

    data.extend_from_slice(&(tx.outputs.len() as u64).to_le_bytes());
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        data.extend_from_slice(&(output.address.len() as u64).to_le_bytes());
        data.extend_from_slice(output.address.as_bytes());
    }

    data.extend_from_slice(&(input_index as u64).to_le_bytes());

    Ok(Hash256::digest(&data))
}

/// Ed25519 signing over [`signing_hash`], bincode wire encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519TxCodec;

impl TxCodec for Ed25519TxCodec {
    fn new_transaction(&self, network: Network) -> Transaction {
        Transaction {
            network,
            version: TX_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn add_output(&self, tx: &mut Transaction, value: u64, address: &str) -> Result<usize, CryptoError> {
        if value == 0 {
            return Err(CryptoError::ZeroValueOutput(address.to_string()));
        }
        let decoded = Address::decode(address)?;
        if decoded.network() != tx.network {
            return Err(AddressError::InvalidVersion(decoded.network().address_version()).into());
        }
        tx.outputs.push(TxOutput {
            value,
            address: address.to_string(),
        });
        Ok(tx.outputs.len() - 1)
    }

    fn add_input(&self, tx: &mut Transaction, outpoint: &OutPoint, public_key: &[u8]) -> Result<usize, CryptoError> {
        PublicKey::from_slice(public_key)?;
        tx.inputs.push(TxInput {
            outpoint: outpoint.clone(),
            public_key: public_key.to_vec(),
            signature: Vec::new(),
        });
        Ok(tx.inputs.len() - 1)
    }

    fn sign(&self, tx: &mut Transaction, private_key: &[u8; 32], input_id: usize) -> Result<(), CryptoError> {
        let sighash = signing_hash(tx, input_id)?;
        let keypair = KeyPair::from_secret_bytes(private_key);
        if keypair.public_key().to_bytes().as_slice() != tx.inputs[input_id].public_key.as_slice() {
            return Err(CryptoError::KeyMismatch { index: input_id });
        }
        tx.inputs[input_id].signature = keypair.sign(sighash.as_bytes()).to_vec();
        Ok(())
    }

    fn verify(&self, tx: &Transaction) -> bool {
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return false;
        }
        (0..tx.inputs.len()).all(|i| verify_input(tx, i).is_ok())
    }

    fn serialize(&self, tx: &Transaction) -> Result<Vec<u8>, CryptoError> {
        bincode::encode_to_vec(tx, bincode::config::standard())
            .map_err(|e| CryptoError::Serialization(e.to_string()))
    }
}

fn verify_input(tx: &Transaction, input_index: usize) -> Result<(), CryptoError> {
    let sighash = signing_hash(tx, input_index)?;
    let input = &tx.inputs[input_index];
    let pk = PublicKey::from_slice(&input.public_key)?;
    pk.verify(sighash.as_bytes(), &input.signature)
}
