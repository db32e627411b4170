//! Wallet lifecycle and address derivation policy.
//!
//! A [`Wallet`] is one session over a stored wallet: it owns the session's
//! [`KeyRing`] and applies the BIP44 layout on top of it
//! (`m / purpose' / coin_type' / account' / change / address_index`).
//! Creating a wallet from a master key bootstraps the purpose and coin-type
//! nodes plus one account with its payment and change branches.

use std::fmt;
use std::sync::Arc;

use keytree_core::address::Network;
use keytree_core::constants::{
    ACCOUNT_DEPTH, CHANGE_BRANCH, MAX_KEY_DEPTH, MAX_ROOT_DEPTH, PAYMENT_BRANCH,
};
use keytree_core::error::PathError;
use keytree_core::hdkey::ExtendedKey;
use keytree_core::path::{self, ChildNumber, PRIVATE_ROOT};
use keytree_core::store::{NewWallet, WalletDeletion, WalletStore};
use keytree_core::traits::KeyDerivation;
use keytree_core::types::{KeyId, KeyNode, WalletId, WalletRecord};

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::keys::{rooted_private, KeyHandle, KeyQuery, KeyRing, KeyScope};

/// Identifies a stored wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletRef {
    Id(WalletId),
    Name(String),
}

impl From<WalletId> for WalletRef {
    fn from(id: WalletId) -> Self {
        WalletRef::Id(id)
    }
}

impl From<&str> for WalletRef {
    fn from(name: &str) -> Self {
        WalletRef::Name(name.to_string())
    }
}

impl From<String> for WalletRef {
    fn from(name: String) -> Self {
        WalletRef::Name(name)
    }
}

impl fmt::Display for WalletRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletRef::Id(id) => write!(f, "{id}"),
            WalletRef::Name(name) => f.write_str(name),
        }
    }
}

/// Parameters for [`Wallet::create`]. Unset fields fall back to [`WalletConfig`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: String,
    /// Serialized extended key to use as the root. A random master key is
    /// generated when absent.
    pub key: Option<String>,
    pub owner: String,
    pub network: Option<Network>,
    pub account_id: Option<u32>,
    pub purpose: Option<u32>,
}

impl CreateOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn key(mut self, serialized: impl Into<String>) -> Self {
        self.key = Some(serialized.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn account_id(mut self, account_id: u32) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn purpose(mut self, purpose: u32) -> Self {
        self.purpose = Some(purpose);
        self
    }
}

/// Conditions for [`Wallet::keys`]. Every set field must match.
///
/// An account filter only matches nodes at account depth or below, and a
/// change filter only nodes at branch depth or below.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub account_id: Option<u32>,
    pub name: Option<String>,
    pub key_id: Option<KeyId>,
    pub change: Option<u32>,
    pub depth: Option<u8>,
}

impl KeyFilter {
    fn matches(&self, node: &KeyNode) -> bool {
        if let Some(account_id) = self.account_id {
            if node.depth < ACCOUNT_DEPTH || node.account_id != account_id {
                return false;
            }
        }
        if let Some(change) = self.change {
            if node.depth < ACCOUNT_DEPTH + 1 || node.change != change {
                return false;
            }
        }
        self.name.as_ref().is_none_or(|n| *n == node.name)
            && self.key_id.is_none_or(|id| id == node.id)
            && self.depth.is_none_or(|d| d == node.depth)
    }
}

/// A session over one stored wallet.
pub struct Wallet {
    pub(crate) record: WalletRecord,
    pub(crate) config: WalletConfig,
    pub(crate) store: Arc<dyn WalletStore>,
    pub(crate) keys: KeyRing,
}

impl Wallet {
    /// Create and store a new wallet.
    ///
    /// Every check that can fail on the input runs before anything is
    /// written.
    pub fn create(
        store: Arc<dyn WalletStore>,
        deriver: Arc<dyn KeyDerivation>,
        config: WalletConfig,
        options: CreateOptions,
    ) -> Result<Self, WalletError> {
        if store.wallet_by_name(&options.name)?.is_some() {
            return Err(WalletError::DuplicateWalletName(options.name));
        }
        let purpose = options.purpose.unwrap_or(config.purpose);
        let account_id = options.account_id.unwrap_or(config.default_account_id);

        let master = match &options.key {
            Some(serialized) => {
                let key = deriver.from_serialized(serialized)?;
                if let Some(expected) = options.network {
                    if expected != key.network() {
                        return Err(WalletError::NetworkMismatch {
                            expected,
                            found: key.network(),
                        });
                    }
                }
                key
            }
            None => deriver.generate_master(options.network.unwrap_or(config.network))?,
        };
        let network = master.network();
        if master.depth() > MAX_ROOT_DEPTH {
            return Err(WalletError::InvalidMasterKeyDepth(master.depth()));
        }
        let root_path = import_path(&master, purpose, network, account_id)?;

        let record = store.create_wallet(NewWallet {
            name: options.name.clone(),
            owner: options.owner,
            network,
            purpose,
        })?;
        let mut wallet = Wallet {
            keys: KeyRing::new(record.id, network, Arc::clone(&store), deriver),
            record,
            config,
            store,
        };
        if let Err(e) = wallet.bootstrap(&master, &root_path, account_id) {
            tracing::warn!(wallet = %wallet.record.name, error = %e, "wallet bootstrap failed; removing wallet");
            if let Err(cleanup) = wallet.store.delete_wallet(wallet.record.id) {
                tracing::warn!(wallet_id = wallet.record.id, error = %cleanup, "cleanup after failed bootstrap failed");
            }
            return Err(e);
        }

        tracing::info!(
            wallet_id = wallet.record.id,
            name = %wallet.record.name,
            network = %network,
            depth = master.depth(),
            "created wallet"
        );
        Ok(wallet)
    }

    fn bootstrap(&mut self, master: &ExtendedKey, root_path: &str, account_id: u32) -> Result<(), WalletError> {
        let scope = KeyScope {
            name: self.record.name.clone(),
            account_id,
            change: 0,
            purpose: self.record.purpose,
        };
        let root = self.keys.insert_if_new(master, &scope, None, root_path)?;
        self.record.main_key_id = Some(root.id());
        self.store.update_wallet(&self.record)?;

        if master.depth() == 0 {
            let branch = [
                ChildNumber::hardened(self.record.purpose)?,
                ChildNumber::hardened(self.record.network.bip44_coin_type())?,
            ];
            self.keys.derive_and_register(&root, &branch, &scope)?;
            self.new_account(Some(account_id), None)?;
        }
        Ok(())
    }

    /// Open a stored wallet.
    pub fn open(
        store: Arc<dyn WalletStore>,
        deriver: Arc<dyn KeyDerivation>,
        config: WalletConfig,
        wallet: impl Into<WalletRef>,
    ) -> Result<Self, WalletError> {
        let record = resolve(store.as_ref(), &wallet.into())?;
        Ok(Wallet {
            keys: KeyRing::new(record.id, record.network, Arc::clone(&store), deriver),
            record,
            config,
            store,
        })
    }

    // --- accessors ---

    pub fn id(&self) -> WalletId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn owner(&self) -> &str {
        &self.record.owner
    }

    pub fn network(&self) -> Network {
        self.record.network
    }

    pub fn purpose(&self) -> u32 {
        self.record.purpose
    }

    /// Cached wallet balance as of the last sync or refresh.
    pub fn balance(&self) -> u64 {
        self.record.balance
    }

    pub fn record(&self) -> &WalletRecord {
        &self.record
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn deriver(&self) -> &dyn KeyDerivation {
        self.keys.deriver()
    }

    /// The wallet's root key.
    pub fn main_key(&mut self) -> Result<Arc<KeyHandle>, WalletError> {
        let id = self
            .record
            .main_key_id
            .ok_or_else(|| WalletError::KeyNotFound(format!("main key of wallet {}", self.record.name)))?;
        self.keys.lookup(id)
    }

    /// Find a key of this wallet by id, address, serialized key, or name.
    pub fn key(&mut self, query: impl Into<KeyQuery>) -> Result<Arc<KeyHandle>, WalletError> {
        self.keys.lookup(query)
    }

    // --- wallet metadata ---

    pub fn set_owner(&mut self, owner: impl Into<String>) -> Result<(), WalletError> {
        let mut record = self.record.clone();
        record.owner = owner.into();
        self.store.update_wallet(&record)?;
        self.record = record;
        Ok(())
    }

    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), WalletError> {
        let mut record = self.record.clone();
        record.name = name.into();
        self.store.update_wallet(&record)?;
        tracing::info!(wallet_id = record.id, from = %self.record.name, to = %record.name, "renamed wallet");
        self.record = record;
        Ok(())
    }

    // --- key tree ---

    /// Create an account with its payment and change branches.
    ///
    /// Without an id the next unused one is taken.
    pub fn new_account(&mut self, account_id: Option<u32>, name: Option<&str>) -> Result<Arc<KeyHandle>, WalletError> {
        let accounts = self.accounts()?;
        let account_id = match account_id {
            Some(id) => id,
            None => accounts
                .iter()
                .map(|n| n.account_id)
                .max()
                .map_or(0, |max| max + 1),
        };
        if accounts.iter().any(|n| n.account_id == account_id) {
            return Err(WalletError::AccountExists(account_id));
        }

        let coin_path = format!(
            "{PRIVATE_ROOT}/{}'/{}'",
            self.record.purpose,
            self.record.network.bip44_coin_type()
        );
        let coin_node = self
            .store
            .key_by_path(self.record.id, &coin_path)?
            .ok_or_else(|| WalletError::MissingMasterKey(self.record.name.clone()))?;
        let coin = self.keys.handle(coin_node);

        let name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => format!("Account #{account_id}"),
        };
        let purpose = self.record.purpose;
        let scope = |name: String, change: u32| KeyScope { name, account_id, change, purpose };

        let account = self.keys.derive_and_register(
            &coin,
            &[ChildNumber::hardened(account_id)?],
            &scope(name.clone(), PAYMENT_BRANCH),
        )?;
        self.keys.derive_and_register(
            &account,
            &[ChildNumber::normal(PAYMENT_BRANCH)?],
            &scope(format!("{name} Payments"), PAYMENT_BRANCH),
        )?;
        self.keys.derive_and_register(
            &account,
            &[ChildNumber::normal(CHANGE_BRANCH)?],
            &scope(format!("{name} Change"), CHANGE_BRANCH),
        )?;

        tracing::info!(wallet_id = self.record.id, account_id, path = %account.path(), "created account");
        Ok(account)
    }

    /// Derive the next address key on the payment (`change == 0`) or change
    /// (`change == 1`) branch of an account, creating the account if needed.
    pub fn new_key(
        &mut self,
        name: Option<&str>,
        account_id: Option<u32>,
        change: u32,
        max_depth: u8,
    ) -> Result<Arc<KeyHandle>, WalletError> {
        let account_id = account_id.unwrap_or(self.config.default_account_id);
        let account = self.account_key(account_id)?;
        let index = self.next_address_index(account_id, change, max_depth)?;
        let name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => format!("Key {index}"),
        };
        let scope = KeyScope {
            name,
            account_id,
            change,
            purpose: self.record.purpose,
        };
        self.keys.derive_and_register(
            &account,
            &[ChildNumber::normal(change)?, ChildNumber::normal(index)?],
            &scope,
        )
    }

    /// [`new_key`](Self::new_key) on the change branch.
    pub fn new_key_change(&mut self, name: Option<&str>, account_id: Option<u32>) -> Result<Arc<KeyHandle>, WalletError> {
        self.new_key(name, account_id, CHANGE_BRANCH, MAX_KEY_DEPTH)
    }

    /// The account node, created on demand.
    pub(crate) fn account_key(&mut self, account_id: u32) -> Result<Arc<KeyHandle>, WalletError> {
        let existing = self
            .keys(&KeyFilter {
                account_id: Some(account_id),
                depth: Some(ACCOUNT_DEPTH),
                ..KeyFilter::default()
            })?
            .into_iter()
            .next();
        match existing {
            Some(node) => Ok(self.keys.handle(node)),
            None => match self.new_account(Some(account_id), None) {
                Err(WalletError::MissingMasterKey(_)) => Err(WalletError::NoMasterKey { account_id }),
                other => other,
            },
        }
    }

    /// Next free address index at `depth` on an account branch.
    pub(crate) fn next_address_index(&self, account_id: u32, change: u32, depth: u8) -> Result<u32, WalletError> {
        let last = self
            .keys(&KeyFilter {
                account_id: Some(account_id),
                change: Some(change),
                depth: Some(depth),
                ..KeyFilter::default()
            })?
            .into_iter()
            .map(|n| n.address_index)
            .max();
        Ok(last.map_or(0, |i| i + 1))
    }

    /// The key at `path`, deriving any missing nodes from the closest stored ancestor.
    ///
    /// In strict mode the path must follow this wallet's BIP44 layout: same
    /// purpose and coin type, with purpose, coin type and account hardened.
    pub fn key_for_path(
        &mut self,
        key_path: &str,
        name: Option<&str>,
        account_id: u32,
        change: u32,
        strict: bool,
    ) -> Result<Arc<KeyHandle>, WalletError> {
        let parsed = path::parse(key_path)?;
        let normalized = rooted_private(&path::normalize(key_path)?);

        if strict {
            let purpose = path::segment_index(parsed.purpose.as_deref())?;
            if purpose != self.record.purpose {
                return Err(WalletError::PurposeMismatch {
                    path: normalized,
                    expected: self.record.purpose,
                    found: purpose,
                });
            }
            let coin_type = path::segment_index(parsed.coin_type.as_deref())?;
            let expected = self.record.network.bip44_coin_type();
            if coin_type != expected {
                return Err(WalletError::CointypeMismatch {
                    path: normalized,
                    expected,
                    found: coin_type,
                });
            }
            let hardened = [&parsed.purpose, &parsed.coin_type, &parsed.account]
                .iter()
                .all(|s| path::is_hardened_segment(s.as_deref()));
            if !hardened {
                return Err(WalletError::UnhardenedPath(normalized));
            }
        }

        let ancestor = self
            .keys
            .closest_ancestor(&normalized)?
            .ok_or_else(|| PathError::NoAncestor(normalized.clone()))?;
        if ancestor.path == normalized {
            return Ok(self.keys.handle(ancestor));
        }

        let remaining = path::suffix(&normalized, &ancestor.path)?;
        let scope = KeyScope {
            name: name.filter(|n| !n.is_empty()).unwrap_or(self.record.name.as_str()).to_string(),
            account_id: match parsed.account.as_deref() {
                Some(segment) => path::segment_index(Some(segment))?,
                None => account_id,
            },
            change: match parsed.change.as_deref() {
                Some(segment) => path::segment_index(Some(segment))?,
                None => change,
            },
            purpose: self.record.purpose,
        };
        let parent = self.keys.handle(ancestor);
        self.keys.derive_and_register(&parent, &remaining, &scope)
    }

    /// Store an extended key in this wallet. A depth-3 key becomes an account node.
    pub fn import_key(&mut self, serialized: &str, account_id: Option<u32>, name: Option<&str>) -> Result<Arc<KeyHandle>, WalletError> {
        let key = self.keys.deriver().from_serialized(serialized)?;
        if key.network() != self.record.network {
            return Err(WalletError::NetworkMismatch {
                expected: self.record.network,
                found: key.network(),
            });
        }
        let account_id = account_id.unwrap_or(self.config.default_account_id);
        let key_path = import_path(&key, self.record.purpose, self.record.network, account_id)?;
        let scope = KeyScope {
            name: name.filter(|n| !n.is_empty()).unwrap_or(self.record.name.as_str()).to_string(),
            account_id,
            change: 0,
            purpose: self.record.purpose,
        };
        let handle = self.keys.insert_if_new(&key, &scope, None, &key_path)?;
        tracing::info!(wallet_id = self.record.id, key_id = handle.id(), path = %handle.path(), "imported key");
        Ok(handle)
    }

    // --- enumeration ---

    /// Keys of this wallet and purpose matching `filter`, ordered by id.
    pub fn keys(&self, filter: &KeyFilter) -> Result<Vec<KeyNode>, WalletError> {
        Ok(self
            .store
            .keys(self.record.id)?
            .into_iter()
            .filter(|n| n.purpose == self.record.purpose && filter.matches(n))
            .collect())
    }

    /// Account nodes.
    pub fn accounts(&self) -> Result<Vec<KeyNode>, WalletError> {
        self.keys(&KeyFilter {
            depth: Some(ACCOUNT_DEPTH),
            ..KeyFilter::default()
        })
    }

    /// Address keys of an account, both branches.
    pub fn addresses(&self, account_id: u32) -> Result<Vec<KeyNode>, WalletError> {
        self.address_keys(account_id, None)
    }

    pub fn payment_keys(&self, account_id: u32) -> Result<Vec<KeyNode>, WalletError> {
        self.address_keys(account_id, Some(PAYMENT_BRANCH))
    }

    pub fn change_keys(&self, account_id: u32) -> Result<Vec<KeyNode>, WalletError> {
        self.address_keys(account_id, Some(CHANGE_BRANCH))
    }

    fn address_keys(&self, account_id: u32, change: Option<u32>) -> Result<Vec<KeyNode>, WalletError> {
        self.keys(&KeyFilter {
            account_id: Some(account_id),
            change,
            depth: Some(MAX_KEY_DEPTH),
            ..KeyFilter::default()
        })
    }

    /// Addresses of every key in scope.
    pub fn address_list(&self, account_id: Option<u32>, key_id: Option<KeyId>) -> Result<Vec<String>, WalletError> {
        Ok(self
            .keys(&KeyFilter {
                account_id,
                key_id,
                ..KeyFilter::default()
            })?
            .into_iter()
            .map(|n| n.address)
            .collect())
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("network", &self.record.network)
            .field("purpose", &self.record.purpose)
            .field("balance", &self.record.balance)
            .finish()
    }
}

/// Where an imported root key is stored.
fn import_path(key: &ExtendedKey, purpose: u32, network: Network, account_id: u32) -> Result<String, WalletError> {
    match key.depth() {
        0 => Ok(PRIVATE_ROOT.to_string()),
        ACCOUNT_DEPTH => Ok(format!(
            "{PRIVATE_ROOT}/{purpose}'/{}'/{account_id}'",
            network.bip44_coin_type()
        )),
        depth => Err(WalletError::DepthMismatch {
            depth,
            path: PRIVATE_ROOT.to_string(),
        }),
    }
}

fn resolve(store: &dyn WalletStore, wallet: &WalletRef) -> Result<WalletRecord, WalletError> {
    let record = match wallet {
        WalletRef::Id(id) => store.wallet(*id)?,
        WalletRef::Name(name) => store.wallet_by_name(name)?,
    };
    record.ok_or_else(|| WalletError::WalletNotFound(wallet.to_string()))
}

// --- store-level operations ---

/// All stored wallets, ordered by id.
pub fn list_wallets(store: &dyn WalletStore) -> Result<Vec<WalletRecord>, WalletError> {
    Ok(store.wallets()?)
}

pub fn wallet_exists(store: &dyn WalletStore, wallet: impl Into<WalletRef>) -> Result<bool, WalletError> {
    match resolve(store, &wallet.into()) {
        Ok(_) => Ok(true),
        Err(WalletError::WalletNotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete a wallet with all its keys and outputs.
///
/// Refuses while any key holds a cached balance, unless `force` is set.
pub fn delete_wallet(
    store: &dyn WalletStore,
    wallet: impl Into<WalletRef>,
    force: bool,
) -> Result<WalletDeletion, WalletError> {
    let record = resolve(store, &wallet.into())?;
    if !force {
        if let Some(funded) = store.keys(record.id)?.into_iter().find(|k| k.balance > 0) {
            return Err(WalletError::ForceDeleteRequired {
                key_id: funded.id,
                address: funded.address,
                balance: funded.balance,
            });
        }
    }
    let deleted = store.delete_wallet(record.id)?;
    tracing::info!(wallet_id = record.id, name = %record.name, force, "wallet deleted");
    Ok(deleted)
}
