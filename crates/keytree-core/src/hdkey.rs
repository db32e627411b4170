//! Extended keys and the reference [`KeyDerivation`] implementation.
//!
//! [`Ed25519Derivation`] keeps the BIP32 tree shape (depth, parent
//! fingerprint, child number, chain code) and BIP32's additive structure,
//! but on the Ed25519 group and with BLAKE3 in place of HMAC-SHA512.
//! Secrets are scalars `k` with public key `K = k·B`:
//!
//! ```text
//! okm          = BLAKE3-XOF(key = chain_code, tag || material || child_number_be)[..96]
//! tweak        = okm[..64] reduced mod l
//! child_secret = parent_secret + tweak
//! child_public = parent_public + tweak·B
//! child_chain  = okm[64..]
//! ```
//!
//! where `tag || material` is `0x00 || parent_secret` for hardened children
//! and `0x01 || parent_public` otherwise. Normal children can therefore be
//! derived from a public-only key; hardened children need the secret.
//!
//! Serialized keys are the 78-byte BIP32 layout in Base58Check, so private
//! mainnet keys read `xprv...` and public testnet keys read `tpub...`.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::address::{decode_check, encode_check, Address, Network};
use crate::crypto::{fingerprint, KeyPair, PublicKey};
use crate::error::CryptoError;
use crate::path::ChildNumber;
use crate::traits::KeyDerivation;
use crate::types::KeyType;

/// BLAKE3 KDF context for master keys.
const MASTER_KEY_CONTEXT: &str = "keytree 2024-06-01 master extended key";

/// Wide scalar bytes followed by a chain code.
const OKM_LEN: usize = 96;

/// Length of a serialized extended key before the checksum.
pub const SERIALIZED_KEY_LEN: usize = 78;

/// Accepted seed sizes, in bytes.
pub const MIN_SEED_LEN: usize = 16;
pub const MAX_SEED_LEN: usize = 64;

const PRIVATE_KEY_TAG: u8 = 0x00;
const PUBLIC_KEY_TAG: u8 = 0x01;

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
struct SecretBytes([u8; 32]);

/// A node of a BIP32-shaped key tree, with or without its secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtendedKey {
    network: Network,
    depth: u8,
    parent_fingerprint: [u8; 4],
    child_number: ChildNumber,
    chain_code: [u8; 32],
    public_key: [u8; 32],
    secret: Option<SecretBytes>,
}

impl ExtendedKey {
    /// Build a private extended key; the public half is computed from `secret`.
    pub fn new_private(
        network: Network,
        depth: u8,
        parent_fingerprint: [u8; 4],
        child_number: ChildNumber,
        chain_code: [u8; 32],
        secret: [u8; 32],
    ) -> Self {
        let public_key = KeyPair::from_secret_bytes(&secret).public_key().to_bytes();
        Self {
            network,
            depth,
            parent_fingerprint,
            child_number,
            chain_code,
            public_key,
            secret: Some(SecretBytes(secret)),
        }
    }

    /// Build a public-only extended key. Fails if `public_key` is not a valid point.
    pub fn new_public(
        network: Network,
        depth: u8,
        parent_fingerprint: [u8; 4],
        child_number: ChildNumber,
        chain_code: [u8; 32],
        public_key: [u8; 32],
    ) -> Result<Self, CryptoError> {
        PublicKey::from_bytes(&public_key)?;
        Ok(Self {
            network,
            depth,
            parent_fingerprint,
            child_number,
            chain_code,
            public_key,
            secret: None,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn key_type(&self) -> KeyType {
        if self.secret.is_some() { KeyType::Private } else { KeyType::Public }
    }

    pub fn is_private(&self) -> bool {
        self.secret.is_some()
    }

    pub fn child_number(&self) -> ChildNumber {
        self.child_number
    }

    /// Child index without the hardening bit.
    pub fn child_index(&self) -> u32 {
        self.child_number.index()
    }

    pub fn parent_fingerprint(&self) -> [u8; 4] {
        self.parent_fingerprint
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn public_bytes(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// Raw secret, if this key carries one. Handle with care.
    pub fn private_bytes(&self) -> Option<&[u8; 32]> {
        self.secret.as_ref().map(|s| &s.0)
    }

    pub fn fingerprint(&self) -> [u8; 4] {
        fingerprint(&self.public_key)
    }

    /// Signing keypair, if this key carries a secret.
    pub fn keypair(&self) -> Option<KeyPair> {
        self.private_bytes().map(KeyPair::from_secret_bytes)
    }

    /// The same key with its secret dropped.
    pub fn neutered(&self) -> Self {
        Self {
            secret: None,
            ..self.clone()
        }
    }
}

impl fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKey")
            .field("network", &self.network)
            .field("depth", &self.depth)
            .field("child_number", &self.child_number)
            .field("public_key", &hex::encode(self.public_key))
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// BLAKE3/Ed25519 key derivation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Derivation;

impl KeyDerivation for Ed25519Derivation {
    fn master_from_seed(&self, seed: &[u8], network: Network) -> Result<ExtendedKey, CryptoError> {
        if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&seed.len()) {
            return Err(CryptoError::InvalidExtendedKey(format!(
                "seed must be {MIN_SEED_LEN}..={MAX_SEED_LEN} bytes, got {}",
                seed.len()
            )));
        }
        let mut okm = [0u8; OKM_LEN];
        let mut hasher = blake3::Hasher::new_derive_key(MASTER_KEY_CONTEXT);
        hasher.update(seed);
        hasher.finalize_xof().fill(&mut okm);

        let (scalar, chain_code) = split_okm(&mut okm);
        let secret = nonzero(scalar)?.to_bytes();
        Ok(ExtendedKey::new_private(
            network,
            0,
            [0u8; 4],
            ChildNumber::from_raw(0),
            chain_code,
            secret,
        ))
    }

    fn derive_child(
        &self,
        parent: &ExtendedKey,
        index: u32,
        hardened: bool,
    ) -> Result<ExtendedKey, CryptoError> {
        let child = ChildNumber::new(index, hardened).map_err(|_| CryptoError::IndexOutOfRange(index))?;
        let depth = parent
            .depth()
            .checked_add(1)
            .ok_or(CryptoError::DepthOverflow(parent.depth()))?;

        let mut hasher = blake3::Hasher::new_keyed(parent.chain_code());
        if hardened {
            let parent_secret = parent
                .private_bytes()
                .ok_or_else(|| CryptoError::PublicDerivation(child.to_string()))?;
            hasher.update(&[PRIVATE_KEY_TAG]);
            hasher.update(parent_secret);
        } else {
            hasher.update(&[PUBLIC_KEY_TAG]);
            hasher.update(parent.public_bytes());
        }
        hasher.update(&child.to_raw().to_be_bytes());
        let mut okm = [0u8; OKM_LEN];
        hasher.finalize_xof().fill(&mut okm);
        let (tweak, chain_code) = split_okm(&mut okm);

        match parent.private_bytes() {
            Some(parent_secret) => {
                let mut scalar = Scalar::from_bytes_mod_order(*parent_secret) + tweak;
                let secret = nonzero(scalar)?.to_bytes();
                scalar.zeroize();
                Ok(ExtendedKey::new_private(
                    parent.network(),
                    depth,
                    parent.fingerprint(),
                    child,
                    chain_code,
                    secret,
                ))
            }
            None => {
                let parent_point = CompressedEdwardsY(*parent.public_bytes())
                    .decompress()
                    .ok_or(CryptoError::InvalidPublicKey)?;
                let point: EdwardsPoint = parent_point + EdwardsPoint::mul_base(&tweak);
                if point.is_identity() {
                    return Err(CryptoError::InvalidExtendedKey("derived key is the identity".into()));
                }
                ExtendedKey::new_public(
                    parent.network(),
                    depth,
                    parent.fingerprint(),
                    child,
                    chain_code,
                    point.compress().to_bytes(),
                )
            }
        }
    }

    fn public_address(&self, key: &ExtendedKey) -> String {
        Address::from_public_key(key.public_bytes(), key.network()).encode()
    }

    fn serialize(&self, key: &ExtendedKey) -> String {
        let mut payload = Vec::with_capacity(SERIALIZED_KEY_LEN);
        payload.extend_from_slice(&key.network().key_version(key.key_type()));
        payload.push(key.depth());
        payload.extend_from_slice(&key.parent_fingerprint());
        payload.extend_from_slice(&key.child_number().to_raw().to_be_bytes());
        payload.extend_from_slice(key.chain_code());
        match key.private_bytes() {
            Some(secret) => {
                payload.push(PRIVATE_KEY_TAG);
                payload.extend_from_slice(secret);
            }
            None => {
                payload.push(PUBLIC_KEY_TAG);
                payload.extend_from_slice(key.public_bytes());
            }
        }
        let encoded = encode_check(&payload);
        payload.zeroize();
        encoded
    }

    fn from_serialized(&self, serialized: &str) -> Result<ExtendedKey, CryptoError> {
        let mut payload = decode_check(serialized.trim())?;
        if payload.len() != SERIALIZED_KEY_LEN {
            return Err(CryptoError::InvalidExtendedKey(format!(
                "expected {SERIALIZED_KEY_LEN} bytes, got {}",
                payload.len()
            )));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&payload[0..4]);
        let (network, key_type) = Network::from_key_version(version)
            .ok_or_else(|| CryptoError::UnknownKeyVersion(hex::encode(version)))?;

        let depth = payload[4];
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&payload[5..9]);
        let mut raw_child = [0u8; 4];
        raw_child.copy_from_slice(&payload[9..13]);
        let child_number = ChildNumber::from_raw(u32::from_be_bytes(raw_child));
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);
        let tag = payload[45];
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&payload[46..78]);
        payload.zeroize();

        let key = match (key_type, tag) {
            (KeyType::Private, PRIVATE_KEY_TAG) => Ok(ExtendedKey::new_private(
                network,
                depth,
                parent_fingerprint,
                child_number,
                chain_code,
                key_bytes,
            )),
            (KeyType::Public, PUBLIC_KEY_TAG) => ExtendedKey::new_public(
                network,
                depth,
                parent_fingerprint,
                child_number,
                chain_code,
                key_bytes,
            ),
            _ => Err(CryptoError::InvalidExtendedKey(format!(
                "key tag {tag:#04x} does not match {key_type:?} version"
            ))),
        };
        key_bytes.zeroize();
        key
    }
}

/// Split derivation output into a scalar and a chain code, wiping `okm`.
fn split_okm(okm: &mut [u8; OKM_LEN]) -> (Scalar, [u8; 32]) {
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&okm[..64]);
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&okm[64..]);
    wide.zeroize();
    okm.zeroize();
    (scalar, chain_code)
}

fn nonzero(scalar: Scalar) -> Result<Scalar, CryptoError> {
    if scalar == Scalar::ZERO {
        return Err(CryptoError::InvalidExtendedKey("derived key is zero".into()));
    }
    Ok(scalar)
}
