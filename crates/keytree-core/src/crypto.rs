//! Ed25519 primitives shared by key derivation and transaction signing.
//!
//! Secrets are Ed25519 scalars rather than RFC 8032 seeds, so that a public
//! key can be tweaked additively during child derivation. Signing goes
//! through the ed25519-dalek hazmat API; signatures are ordinary Ed25519
//! signatures and verify with any conforming verifier. BLAKE3 provides
//! address hashes and key fingerprints.

use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::Verifier;
use ed25519_dalek::hazmat::{self, ExpandedSecretKey};
use std::fmt;

use crate::address::ADDRESS_HASH_LEN;
use crate::error::CryptoError;

/// Domain separation for the per-key nonce prefix.
const NONCE_PREFIX_CONTEXT: &str = "keytree 2024-06-01 signing nonce prefix";

/// Ed25519 keypair over a raw scalar secret.
///
/// The 32 secret bytes are read as a little-endian scalar reduced mod l.
/// [`ExpandedSecretKey`] zeroizes itself on drop.
pub struct KeyPair {
    secret: ExpandedSecretKey,
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl KeyPair {
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        let secret = ExpandedSecretKey {
            scalar: Scalar::from_bytes_mod_order(*bytes),
            hash_prefix: blake3::derive_key(NONCE_PREFIX_CONTEXT, bytes),
        };
        let verifying_key = ed25519_dalek::VerifyingKey::from(&secret);
        Self {
            secret,
            verifying_key,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.verifying_key,
        }
    }

    /// Sign a message, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        hazmat::raw_sign::<sha2::Sha512>(&self.secret, message, &self.verifying_key).to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key: vk })
    }

    /// Parse a public key from a byte slice of any length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&array)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let sig_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

/// Truncated BLAKE3 hash of a public key, as carried by an address.
pub fn address_hash(public_key: &[u8; 32]) -> [u8; ADDRESS_HASH_LEN] {
    let digest = blake3::hash(public_key);
    let mut out = [0u8; ADDRESS_HASH_LEN];
    out.copy_from_slice(&digest.as_bytes()[..ADDRESS_HASH_LEN]);
    out
}

/// Four-byte identifier of a key, recorded by its children as parent fingerprint.
pub fn fingerprint(public_key: &[u8; 32]) -> [u8; 4] {
    let digest = blake3::hash(public_key);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.as_bytes()[..4]);
    out
}
