//! BIP32/BIP44 derivation path algebra.
//!
//! Paths are `/`-separated strings whose first segment is the root marker
//! (`m` for private trees, `M` for public ones) followed by child numbers.
//! A child number carries a hardening suffix; the accepted suffixes are
//! `'`, `H`, `h`, `P` and `p`, and [`normalize`] rewrites all of them to `'`.
//!
//! ```
//! use keytree_core::path;
//! assert_eq!(path::normalize("m/44h/1H/0p").unwrap(), "m/44'/1'/0'");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::constants::{HARDENED_OFFSET, MAX_PATH_SEGMENTS};
use crate::error::PathError;

/// Canonical hardening marker.
pub const HARDENED_MARKER: char = '\'';

/// Root segment of a private derivation tree.
pub const PRIVATE_ROOT: &str = "m";

/// Root segment of a public derivation tree.
pub const PUBLIC_ROOT: &str = "M";

const HARDENED_SUFFIXES: [char; 5] = ['\'', 'H', 'h', 'P', 'p'];

/// Rewrite every hardening suffix to `'` and reject empty segments.
///
/// Trailing slashes count as an empty segment.
pub fn normalize(path: &str) -> Result<String, PathError> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(PathError::EmptySegment(path.to_string()));
        }
        segments.push(normalize_segment(segment));
    }
    Ok(segments.join("/"))
}

fn normalize_segment(segment: &str) -> String {
    match segment.char_indices().last() {
        Some((pos, c)) if HARDENED_SUFFIXES.contains(&c) => {
            let mut out = String::with_capacity(pos + 1);
            out.push_str(&segment[..pos]);
            out.push(HARDENED_MARKER);
            out
        }
        _ => segment.to_string(),
    }
}

/// The positional reading of a normalized path.
///
/// Each segment is present only when the path is long enough to carry it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bip44Path {
    /// True when the root marker is `m`.
    pub is_private: bool,
    pub purpose: Option<String>,
    pub coin_type: Option<String>,
    pub account: Option<String>,
    pub change: Option<String>,
    pub address_index: Option<String>,
}

/// Normalize `path` and split it into its BIP44 positions.
pub fn parse(path: &str) -> Result<Bip44Path, PathError> {
    let normalized = normalize(path)?;
    let segments: Vec<&str> = normalized.split('/').collect();
    if segments.is_empty() || segments.len() > MAX_PATH_SEGMENTS {
        return Err(PathError::InvalidDepth {
            path: path.to_string(),
            segments: segments.len(),
            max: MAX_PATH_SEGMENTS,
        });
    }
    let at = |i: usize| segments.get(i).map(|s| s.to_string());
    Ok(Bip44Path {
        is_private: segments[0] == PRIVATE_ROOT,
        purpose: at(1),
        coin_type: at(2),
        account: at(3),
        change: at(4),
        address_index: at(5),
    })
}

/// Numeric value of an optional segment, ignoring hardening. Absent is 0.
pub fn segment_index(segment: Option<&str>) -> Result<u32, PathError> {
    match segment {
        None => Ok(0),
        Some(s) => Ok(s.parse::<ChildNumber>()?.index()),
    }
}

/// Whether an optional segment is present and hardened.
pub fn is_hardened_segment(segment: Option<&str>) -> bool {
    segment.is_some_and(|s| s.ends_with(HARDENED_MARKER))
}

/// Number of child segments below the root marker.
pub fn depth(path: &str) -> usize {
    path.split('/').count().saturating_sub(1)
}

/// The path itself followed by each of its ancestors, ending at the root.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(path), |p| p.rfind('/').map(|i| &p[..i]))
}

/// Append child numbers to a base path.
pub fn join(base: &str, children: &[ChildNumber]) -> String {
    let mut out = base.to_string();
    for child in children {
        out.push('/');
        out.push_str(&child.to_string());
    }
    out
}

/// Child numbers of `path` below `ancestor`. Both must be normalized.
pub fn suffix(path: &str, ancestor: &str) -> Result<Vec<ChildNumber>, PathError> {
    if path == ancestor {
        return Ok(Vec::new());
    }
    let rest = path
        .strip_prefix(ancestor)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(|| PathError::NotDescendant {
            path: path.to_string(),
            ancestor: ancestor.to_string(),
        })?;
    rest.split('/').map(str::parse).collect()
}

/// Every child number of a normalized path, root marker excluded.
pub fn children(path: &str) -> Result<Vec<ChildNumber>, PathError> {
    path.split('/').skip(1).map(str::parse).collect()
}

/// One segment of a derivation path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildNumber {
    index: u32,
    hardened: bool,
}

impl ChildNumber {
    /// An unhardened child. `index` must be below 2^31.
    pub fn normal(index: u32) -> Result<Self, PathError> {
        Self::new(index, false)
    }

    /// A hardened child. `index` must be below 2^31.
    pub fn hardened(index: u32) -> Result<Self, PathError> {
        Self::new(index, true)
    }

    pub fn new(index: u32, hardened: bool) -> Result<Self, PathError> {
        if index >= HARDENED_OFFSET {
            return Err(PathError::InvalidIndex(index.to_string()));
        }
        Ok(Self { index, hardened })
    }

    /// Decode a raw BIP32 child number with the hardening bit folded in.
    pub fn from_raw(raw: u32) -> Self {
        Self {
            index: raw & !HARDENED_OFFSET,
            hardened: raw & HARDENED_OFFSET != 0,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_hardened(&self) -> bool {
        self.hardened
    }

    /// The raw BIP32 child number.
    pub fn to_raw(&self) -> u32 {
        if self.hardened { self.index | HARDENED_OFFSET } else { self.index }
    }
}

impl fmt::Display for ChildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}{}", self.index, HARDENED_MARKER)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

impl FromStr for ChildNumber {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_segment(s);
        let (digits, hardened) = match normalized.strip_suffix(HARDENED_MARKER) {
            Some(d) => (d, true),
            None => (normalized.as_str(), false),
        };
        let index = digits
            .parse::<u32>()
            .map_err(|_| PathError::InvalidIndex(s.to_string()))?;
        Self::new(index, hardened).map_err(|_| PathError::InvalidIndex(s.to_string()))
    }
}
