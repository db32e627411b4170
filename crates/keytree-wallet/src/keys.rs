//! Key node store: a wallet's tree of derived keys.
//!
//! Nodes live in the [`WalletStore`] and reference their parent by id. A
//! [`KeyRing`] is the per-session view of one wallet's tree. It derives and
//! registers new nodes, finds the closest stored ancestor of a path, and
//! keeps an identity map so every lookup of the same key id within a session
//! returns the same [`KeyHandle`].
//!
//! Registration is idempotent: inserting a key the wallet already holds
//! (same serialized form or same public key) returns the stored node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use zeroize::Zeroizing;

use keytree_core::address::Network;
use keytree_core::constants::ACCOUNT_DEPTH;
use keytree_core::hdkey::ExtendedKey;
use keytree_core::path::{self, ChildNumber, PRIVATE_ROOT, PUBLIC_ROOT};
use keytree_core::store::{KeyInsert, KeyMatch, NewKeyNode, WalletStore};
use keytree_core::traits::KeyDerivation;
use keytree_core::types::{KeyId, KeyNode, WalletId};

use crate::error::WalletError;

/// A stored key node with lazily loaded key material.
#[derive(Debug)]
pub struct KeyHandle {
    node: KeyNode,
    balance: AtomicU64,
    material: OnceLock<ExtendedKey>,
}

impl KeyHandle {
    fn new(node: KeyNode, material: Option<ExtendedKey>) -> Self {
        let cell = OnceLock::new();
        if let Some(key) = material {
            let _ = cell.set(key);
        }
        Self {
            balance: AtomicU64::new(node.balance),
            node,
            material: cell,
        }
    }

    /// The node as loaded. Its `balance` field may be stale; use [`balance`](Self::balance).
    pub fn node(&self) -> &KeyNode {
        &self.node
    }

    pub fn id(&self) -> KeyId {
        self.node.id
    }

    pub fn path(&self) -> &str {
        &self.node.path
    }

    pub fn address(&self) -> &str {
        &self.node.address
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn depth(&self) -> u8 {
        self.node.depth
    }

    pub fn is_private(&self) -> bool {
        self.node.is_private
    }

    /// Cached balance as of the last sync.
    pub fn balance(&self) -> u64 {
        self.balance.load(Ordering::Relaxed)
    }

    pub(crate) fn set_balance(&self, balance: u64) {
        self.balance.store(balance, Ordering::Relaxed);
    }

    /// Extended key, parsed from the serialized form on first use.
    pub fn key(&self, deriver: &dyn KeyDerivation) -> Result<&ExtendedKey, WalletError> {
        if let Some(key) = self.material.get() {
            return Ok(key);
        }
        let key = deriver.from_serialized(&self.node.serialized)?;
        Ok(self.material.get_or_init(|| key))
    }

    /// Raw signing secret. Fails for public-only nodes.
    pub fn signing_key(&self, deriver: &dyn KeyDerivation) -> Result<Zeroizing<[u8; 32]>, WalletError> {
        let missing = || WalletError::MissingPrivateKey {
            key_id: self.node.id,
            address: self.node.address.clone(),
        };
        if !self.node.is_private {
            return Err(missing());
        }
        self.key(deriver)?
            .private_bytes()
            .map(|secret| Zeroizing::new(*secret))
            .ok_or_else(missing)
    }
}

/// Attributes stamped on nodes created by one registration call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScope {
    pub name: String,
    pub account_id: u32,
    pub change: u32,
    pub purpose: u32,
}

impl KeyScope {
    /// Account id and change branch recorded for a node at `depth`.
    ///
    /// Only account-level nodes and below belong to an account, and only
    /// nodes below the account sit on a change branch.
    fn position_at(&self, depth: u8) -> (u32, u32) {
        let account_id = if depth >= ACCOUNT_DEPTH { self.account_id } else { 0 };
        let change = if depth > ACCOUNT_DEPTH { self.change } else { 0 };
        (account_id, change)
    }
}

/// How [`KeyRing::lookup`] finds a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyQuery {
    /// By key id.
    Id(KeyId),
    /// By address, then serialized key, then name.
    Text(String),
}

impl From<KeyId> for KeyQuery {
    fn from(id: KeyId) -> Self {
        KeyQuery::Id(id)
    }
}

impl From<&str> for KeyQuery {
    fn from(s: &str) -> Self {
        KeyQuery::Text(s.to_string())
    }
}

impl From<String> for KeyQuery {
    fn from(s: String) -> Self {
        KeyQuery::Text(s)
    }
}

/// A key derived in memory but not stored.
#[derive(Debug, Clone)]
pub struct PreviewKey {
    pub key: ExtendedKey,
    pub path: String,
    pub address: String,
}

/// Session view of one wallet's key tree.
pub struct KeyRing {
    wallet_id: WalletId,
    network: Network,
    store: Arc<dyn WalletStore>,
    deriver: Arc<dyn KeyDerivation>,
    handles: HashMap<KeyId, Arc<KeyHandle>>,
}

impl KeyRing {
    pub fn new(
        wallet_id: WalletId,
        network: Network,
        store: Arc<dyn WalletStore>,
        deriver: Arc<dyn KeyDerivation>,
    ) -> Self {
        Self {
            wallet_id,
            network,
            store,
            deriver,
            handles: HashMap::new(),
        }
    }

    pub fn wallet_id(&self) -> WalletId {
        self.wallet_id
    }

    pub fn deriver(&self) -> &dyn KeyDerivation {
        self.deriver.as_ref()
    }

    /// Handle for a stored node, reusing the cached one if present.
    pub fn handle(&mut self, node: KeyNode) -> Arc<KeyHandle> {
        self.cache(node, None)
    }

    fn cache(&mut self, node: KeyNode, material: Option<ExtendedKey>) -> Arc<KeyHandle> {
        if let Some(handle) = self.handles.get(&node.id) {
            handle.set_balance(node.balance);
            return Arc::clone(handle);
        }
        let handle = Arc::new(KeyHandle::new(node, material));
        self.handles.insert(handle.id(), Arc::clone(&handle));
        handle
    }

    /// Update the cached balance of a handle already in the identity map.
    pub(crate) fn set_cached_balance(&self, key_id: KeyId, balance: u64) {
        if let Some(handle) = self.handles.get(&key_id) {
            handle.set_balance(balance);
        }
    }

    /// Resolve a key of this wallet.
    pub fn lookup(&mut self, query: impl Into<KeyQuery>) -> Result<Arc<KeyHandle>, WalletError> {
        let query = query.into();
        let node = match &query {
            KeyQuery::Id(id) => {
                if let Some(handle) = self.handles.get(id) {
                    return Ok(Arc::clone(handle));
                }
                self.store.key(*id)?.filter(|n| n.wallet_id == self.wallet_id)
            }
            KeyQuery::Text(term) => self.find_by_text(term)?,
        };
        match node {
            Some(node) => Ok(self.handle(node)),
            None => Err(WalletError::KeyNotFound(match query {
                KeyQuery::Id(id) => id.to_string(),
                KeyQuery::Text(term) => term,
            })),
        }
    }

    fn find_by_text(&self, term: &str) -> Result<Option<KeyNode>, WalletError> {
        if let Some(node) = self.store.key_by_address(self.wallet_id, term)? {
            return Ok(Some(node));
        }
        if let Some(node) = self.store.key_by_serialized(self.wallet_id, term)? {
            return Ok(Some(node));
        }
        Ok(self
            .store
            .keys(self.wallet_id)?
            .into_iter()
            .find(|n| n.name == term))
    }

    /// The stored node with the longest path that is `target` or one of its ancestors.
    pub fn closest_ancestor(&self, target: &str) -> Result<Option<KeyNode>, WalletError> {
        for candidate in path::ancestors(target) {
            if let Some(node) = self.store.key_by_path(self.wallet_id, candidate)? {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    /// Store `key` at `path` unless the wallet already holds it.
    ///
    /// A depth-3 key offered with the bare root path is an imported account
    /// key and is placed at `m/{purpose}'/{coin_type}'/{account}'`.
    pub fn insert_if_new(
        &mut self,
        key: &ExtendedKey,
        scope: &KeyScope,
        parent_id: Option<KeyId>,
        key_path: &str,
    ) -> Result<Arc<KeyHandle>, WalletError> {
        let mut normalized = rooted_private(&path::normalize(key_path)?);
        if key.depth() == ACCOUNT_DEPTH && normalized == PRIVATE_ROOT {
            normalized = format!(
                "{PRIVATE_ROOT}/{}'/{}'/{}'",
                scope.purpose,
                self.network.bip44_coin_type(),
                scope.account_id
            );
        }
        if key.depth() as usize != path::depth(&normalized) {
            return Err(WalletError::DepthMismatch {
                depth: key.depth(),
                path: normalized,
            });
        }

        let (account_id, change) = scope.position_at(key.depth());
        let new_node = NewKeyNode {
            wallet_id: self.wallet_id,
            parent_id,
            name: scope.name.clone(),
            depth: key.depth(),
            purpose: scope.purpose,
            account_id,
            change,
            address_index: key.child_index(),
            path: normalized,
            address: self.deriver.public_address(key),
            public_key: key.public_bytes().to_vec(),
            serialized: self.deriver.serialize(key),
            key_type: key.key_type(),
            is_private: key.is_private(),
        };

        match self.store.insert_key(new_node)? {
            KeyInsert::Inserted(node) => {
                tracing::debug!(key_id = node.id, path = %node.path, depth = node.depth, "registered key");
                Ok(self.cache(node, Some(key.clone())))
            }
            KeyInsert::Existing { node, matched: KeyMatch::Serialized } => {
                tracing::warn!(key_id = node.id, path = %node.path, "key already in wallet");
                Ok(self.cache(node, Some(key.clone())))
            }
            KeyInsert::Existing { node, matched: KeyMatch::PublicKey } => {
                tracing::debug!(key_id = node.id, path = %node.path, "public key already in wallet");
                Ok(self.cache(node, None))
            }
        }
    }

    /// Derive `children` below `parent` and store every node on the way.
    ///
    /// Derivation starts from the closest stored ancestor of the target path,
    /// so nodes that already exist are reused rather than derived again.
    pub fn derive_and_register(
        &mut self,
        parent: &Arc<KeyHandle>,
        children: &[ChildNumber],
        scope: &KeyScope,
    ) -> Result<Arc<KeyHandle>, WalletError> {
        let (mut current, remaining) = self.start_point(parent, children)?;
        if remaining.is_empty() {
            return Ok(current);
        }

        let mut current_key = current.key(self.deriver.as_ref())?.clone();
        for child in remaining {
            let child_key = self
                .deriver
                .derive_child(&current_key, child.index(), child.is_hardened())?;
            let child_path = path::join(current.path(), &[child]);
            current = self.insert_if_new(&child_key, scope, Some(current.id()), &child_path)?;
            current_key = child_key;
        }
        tracing::info!(key_id = current.id(), path = %current.path(), "new key(s) created");
        Ok(current)
    }

    /// Derive `children` below `parent` in memory only.
    pub fn preview(&mut self, parent: &Arc<KeyHandle>, children: &[ChildNumber]) -> Result<PreviewKey, WalletError> {
        let (start, remaining) = self.start_point(parent, children)?;
        let mut key = start.key(self.deriver.as_ref())?.clone();
        for child in &remaining {
            key = self.deriver.derive_child(&key, child.index(), child.is_hardened())?;
        }
        Ok(PreviewKey {
            address: self.deriver.public_address(&key),
            path: path::join(start.path(), &remaining),
            key,
        })
    }

    /// Closest stored node on the way to `parent/children`, and the segments left below it.
    fn start_point(
        &mut self,
        parent: &Arc<KeyHandle>,
        children: &[ChildNumber],
    ) -> Result<(Arc<KeyHandle>, Vec<ChildNumber>), WalletError> {
        let target = path::join(parent.path(), children);
        match self.closest_ancestor(&target)? {
            Some(node) if node.id != parent.id() => {
                let remaining = path::suffix(&target, &node.path)?;
                Ok((self.handle(node), remaining))
            }
            _ => Ok((Arc::clone(parent), children.to_vec())),
        }
    }
}

/// Replace a public root marker with the private one.
pub(crate) fn rooted_private(normalized: &str) -> String {
    match normalized.strip_prefix(PUBLIC_ROOT) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("{PRIVATE_ROOT}{rest}"),
        _ => normalized.to_string(),
    }
}
