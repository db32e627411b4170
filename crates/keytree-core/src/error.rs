//! Error types shared by the keytree crates.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("empty segment in path {0:?}")] EmptySegment(String),
    #[error("path {path:?} has {segments} segments, expected 1..={max}")] InvalidDepth { path: String, segments: usize, max: usize },
    #[error("invalid index segment {0:?}")] InvalidIndex(String),
    #[error("path {path:?} is not below {ancestor:?}")] NotDescendant { path: String, ancestor: String },
    #[error("no stored ancestor for path {0:?}")] NoAncestor(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58: {0}")] InvalidBase58(String),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid length: got {got}, expected {expected}")] InvalidLength { got: usize, expected: usize },
    #[error("invalid version byte: {0:#04x}")] InvalidVersion(u8),
    #[error("unknown network: {0}")] UnknownNetwork(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
    #[error("signing key does not match the public key on input {index}")] KeyMismatch { index: usize },
    #[error("invalid extended key: {0}")] InvalidExtendedKey(String),
    #[error("unknown extended key version: {0}")] UnknownKeyVersion(String),
    #[error("public-only key cannot derive hardened child {0}")] PublicDerivation(String),
    #[error("child index out of range: {0}")] IndexOutOfRange(u32),
    #[error("key depth overflow below depth {0}")] DepthOverflow(u8),
    #[error("zero-value output to {0}")] ZeroValueOutput(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error(transparent)] Address(#[from] AddressError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage: {0}")] Storage(String),
    #[error("codec: {0}")] Codec(String),
    #[error("duplicate wallet name: {0}")] DuplicateWalletName(String),
    #[error("wallet not found: {0}")] WalletNotFound(u64),
    #[error("key not found: {0}")] KeyNotFound(u64),
    #[error("path {path} in wallet {wallet_id} already holds key {existing}")] PathConflict { wallet_id: u64, path: String, existing: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain service unavailable: {0}")] Unavailable(String),
    #[error("rejected by chain service: {0}")] Rejected(String),
    #[error("malformed response: {0}")] Malformed(String),
}
