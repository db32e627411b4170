//! UTXO ledger: synchronizing a wallet's outputs with a chain service.
//!
//! A sync is a full re-sync of the keys in scope. The chain service is asked
//! for every output of those keys first; only then is one store batch built
//! that drops the scope's unspent rows, inserts the reported outputs, and
//! rewrites the cached key balances. The wallet balance becomes the total of
//! the keys in scope. Rows already marked spent
//! are never deleted or re-added by a sync.

use std::collections::{BTreeSet, HashMap, HashSet};

use keytree_core::store::SyncBatch;
use keytree_core::traits::ChainService;
use keytree_core::types::{KeyId, OutPoint, Utxo};

use crate::error::WalletError;
use crate::wallet::{KeyFilter, Wallet};

/// Which keys a sync covers. Empty means every key of the wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncScope {
    pub account_id: Option<u32>,
    pub key_id: Option<KeyId>,
}

impl SyncScope {
    pub fn account(account_id: u32) -> Self {
        Self {
            account_id: Some(account_id),
            key_id: None,
        }
    }

    pub fn key(key_id: KeyId) -> Self {
        Self {
            account_id: None,
            key_id: Some(key_id),
        }
    }
}

/// What a sync changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Keys whose balance was recomputed.
    pub keys: usize,
    /// Stale unspent rows dropped.
    pub removed: usize,
    /// Outputs stored.
    pub inserted: usize,
    /// Reported outputs not stored because their outpoint already was.
    pub skipped: usize,
    /// Wallet balance after the sync.
    pub balance: u64,
}

impl Wallet {
    /// Re-sync the outputs of every key in `scope` from `chain`.
    ///
    /// A chain failure leaves the ledger untouched.
    pub fn sync_utxos(&mut self, chain: &dyn ChainService, scope: SyncScope) -> Result<SyncReport, WalletError> {
        let in_scope = self.keys(&KeyFilter {
            account_id: scope.account_id,
            key_id: scope.key_id,
            ..KeyFilter::default()
        })?;
        if in_scope.is_empty() {
            return Ok(SyncReport {
                balance: self.record.balance,
                ..SyncReport::default()
            });
        }

        let addresses: BTreeSet<String> = in_scope.iter().map(|k| k.address.clone()).collect();
        let reported = chain.get_utxos(&addresses)?;

        let owner: HashMap<&str, KeyId> = in_scope.iter().map(|k| (k.address.as_str(), k.id)).collect();
        let mut key_balances: HashMap<KeyId, u64> = in_scope.iter().map(|k| (k.id, 0)).collect();
        let mut insert = Vec::with_capacity(reported.len());
        for utxo in reported {
            let Some(&key_id) = owner.get(utxo.address.as_str()) else {
                tracing::warn!(address = %utxo.address, tx_hash = %utxo.tx_hash, "chain reported output for unknown address");
                continue;
            };
            if let Some(balance) = key_balances.get_mut(&key_id) {
                *balance = balance.saturating_add(utxo.value);
            }
            insert.push(Utxo {
                outpoint: utxo.outpoint(),
                wallet_id: self.record.id,
                key_id,
                value: utxo.value,
                confirmations: utxo.confirmations,
                spent: false,
                index: utxo.index,
                script: utxo.script,
            });
        }

        let scope_ids: HashSet<KeyId> = key_balances.keys().copied().collect();
        let remove: Vec<OutPoint> = self
            .store
            .utxos(self.record.id)?
            .into_iter()
            .filter(|u| !u.spent && scope_ids.contains(&u.key_id))
            .map(|u| u.outpoint)
            .collect();

        // The wallet balance follows the keys just synced, so a scoped sync
        // reports that scope's total.
        let wallet_balance = key_balances.values().copied().fold(0u64, u64::saturating_add);

        let mut balances: Vec<(KeyId, u64)> = key_balances.into_iter().collect();
        balances.sort_unstable();

        let outcome = self.store.apply_sync(SyncBatch {
            wallet_id: self.record.id,
            remove,
            insert,
            key_balances: balances.clone(),
            wallet_balance,
        })?;

        self.record.balance = wallet_balance;
        for (key_id, balance) in &balances {
            self.keys.set_cached_balance(*key_id, *balance);
        }

        let report = SyncReport {
            keys: balances.len(),
            removed: outcome.removed,
            inserted: outcome.inserted,
            skipped: outcome.skipped,
            balance: wallet_balance,
        };
        tracing::info!(
            wallet_id = self.record.id,
            account_id = ?scope.account_id,
            key_id = ?scope.key_id,
            keys = report.keys,
            removed = report.removed,
            inserted = report.inserted,
            skipped = report.skipped,
            balance = report.balance,
            "synced utxos"
        );
        Ok(report)
    }

    /// Ask `chain` for the balance of the addresses in scope and cache it on the wallet.
    pub fn refresh_balance(&mut self, chain: &dyn ChainService, account_id: Option<u32>) -> Result<u64, WalletError> {
        let addresses: BTreeSet<String> = self.address_list(account_id, None)?.into_iter().collect();
        let balance = chain.get_balance(&addresses)?;

        let mut record = self.record.clone();
        record.balance = balance;
        self.store.update_wallet(&record)?;
        self.record = record;
        tracing::debug!(wallet_id = self.record.id, balance, "refreshed wallet balance");
        Ok(balance)
    }

    /// Unspent outputs with at least `min_confirmations`, most confirmed first.
    pub fn utxos(&self, account_id: Option<u32>, min_confirmations: u64) -> Result<Vec<Utxo>, WalletError> {
        let accounts: HashMap<KeyId, u32> = self
            .store
            .keys(self.record.id)?
            .into_iter()
            .map(|k| (k.id, k.account_id))
            .collect();
        let mut utxos: Vec<Utxo> = self
            .store
            .utxos(self.record.id)?
            .into_iter()
            .filter(|u| !u.spent && u.confirmations >= min_confirmations)
            .filter(|u| account_id.is_none_or(|a| accounts.get(&u.key_id) == Some(&a)))
            .collect();
        utxos.sort_by(|a, b| {
            b.confirmations
                .cmp(&a.confirmations)
                .then_with(|| a.outpoint.cmp(&b.outpoint))
        });
        Ok(utxos)
    }
}
