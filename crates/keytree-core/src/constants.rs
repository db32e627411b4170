//! Wallet constants. All monetary values in base units (1 coin = 10^8 units).

pub const COIN: u64 = 100_000_000;

/// BIP43 purpose used when a wallet does not name one.
pub const DEFAULT_PURPOSE: u32 = 44;

/// Fixed fee charged when the caller supplies none (0.0003 coin).
pub const FALLBACK_FEE: u64 = 3 * COIN / 10_000;

/// Confirmations an output needs before the assembler will spend it.
pub const DEFAULT_MIN_CONFIRMATIONS: u64 = 4;

/// Deepest node of a BIP44 tree: `m / purpose' / coin' / account' / change / index`.
pub const MAX_KEY_DEPTH: u8 = 5;

/// Deepest key accepted as the root of a wallet.
pub const MAX_ROOT_DEPTH: u8 = 4;

/// Depth of an account node.
pub const ACCOUNT_DEPTH: u8 = 3;

/// Depth of a coin-type node, the parent of every account.
pub const COIN_TYPE_DEPTH: u8 = 2;

/// Longest accepted path, root marker included.
pub const MAX_PATH_SEGMENTS: usize = 6;

/// Bit marking a hardened child number.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Branch index of receiving addresses below an account.
pub const PAYMENT_BRANCH: u32 = 0;

/// Branch index of change addresses below an account.
pub const CHANGE_BRANCH: u32 = 1;
