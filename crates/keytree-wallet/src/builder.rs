//! Transaction assembly and broadcast.
//!
//! Building a spend:
//! 1. Add recipients (address + amount)
//! 2. Select inputs from the account's confirmed unspent outputs
//! 3. Send any leftover value to the next change-branch address
//! 4. Sign every input and verify the result
//!
//! The change key is derived in memory until the transaction verifies; a
//! failed build stores nothing.

use keytree_core::constants::{CHANGE_BRANCH, MAX_KEY_DEPTH};
use keytree_core::path::ChildNumber;
use keytree_core::traits::{ChainService, TxCodec};
use keytree_core::tx::Transaction;
use keytree_core::types::{KeyId, OutPoint, Utxo};

use crate::coin_selection::CoinSelector;
use crate::error::WalletError;
use crate::keys::KeyScope;
use crate::wallet::Wallet;

/// A transaction recipient: address and amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    /// Amount in base units.
    pub amount: u64,
}

/// An output being spent and the key that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedInput {
    pub utxo: Utxo,
    pub key_id: KeyId,
}

/// Leftover value returned to the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutput {
    pub address: String,
    pub amount: u64,
    pub key_id: KeyId,
}

/// A signed and verified transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct DraftTransaction {
    pub tx: Transaction,
    pub inputs: Vec<SelectedInput>,
    pub fee: u64,
    pub total_input: u64,
    pub total_output: u64,
    pub change: Option<ChangeOutput>,
}

impl DraftTransaction {
    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.inputs.iter().map(|i| i.utxo.outpoint.clone()).collect()
    }
}

/// Builder for spend transactions.
///
/// # Example
/// ```ignore
/// let draft = TransactionBuilder::new()
///     .add_output(address, 5 * COIN)
///     .fee(10_000)
///     .build(&mut wallet, &Ed25519TxCodec)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    recipients: Vec<Recipient>,
    inputs: Option<Vec<OutPoint>>,
    account_id: Option<u32>,
    fee: Option<u64>,
    min_confirmations: Option<u64>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipient to the transaction.
    pub fn add_output(&mut self, address: impl Into<String>, amount: u64) -> &mut Self {
        self.recipients.push(Recipient {
            address: address.into(),
            amount,
        });
        self
    }

    /// Spend from this account (default: the configured default account).
    pub fn account(&mut self, account_id: u32) -> &mut Self {
        self.account_id = Some(account_id);
        self
    }

    /// Override the fee (default: the configured fallback fee).
    pub fn fee(&mut self, fee: u64) -> &mut Self {
        self.fee = Some(fee);
        self
    }

    /// Override the spend confirmation threshold.
    pub fn min_confirmations(&mut self, confirmations: u64) -> &mut Self {
        self.min_confirmations = Some(confirmations);
        self
    }

    /// Spend exactly these outputs. Not supported: [`build`](Self::build)
    /// fails with [`WalletError::UnsupportedOperation`] when set.
    pub fn inputs(&mut self, outpoints: Vec<OutPoint>) -> &mut Self {
        self.inputs = Some(outpoints);
        self
    }

    /// Select inputs, add change, sign and verify.
    pub fn build(&self, wallet: &mut Wallet, codec: &dyn TxCodec) -> Result<DraftTransaction, WalletError> {
        if self.inputs.is_some() {
            return Err(WalletError::UnsupportedOperation(
                "spending caller-selected inputs".into(),
            ));
        }
        if self.recipients.is_empty() {
            return Err(WalletError::InvalidAmount("no recipients".into()));
        }
        let mut total_output: u64 = 0;
        for r in &self.recipients {
            if r.amount == 0 {
                return Err(WalletError::InvalidAmount(format!("zero amount to {}", r.address)));
            }
            total_output = total_output
                .checked_add(r.amount)
                .ok_or_else(|| WalletError::InvalidAmount("total amount overflow".into()))?;
        }

        let account_id = self.account_id.unwrap_or(wallet.config.default_account_id);
        let min_confirmations = self.min_confirmations.unwrap_or(wallet.config.min_confirmations);
        let candidates = wallet.utxos(Some(account_id), min_confirmations)?;
        if candidates.is_empty() {
            tracing::warn!(wallet_id = wallet.id(), account_id, min_confirmations, "no spendable outputs");
            return Err(WalletError::NoSpendableOutputs {
                account_id,
                min_confirmations,
            });
        }

        let fee = self.fee.unwrap_or(wallet.config.fallback_fee);
        let target = total_output
            .checked_add(fee)
            .ok_or_else(|| WalletError::InvalidAmount("amount plus fee overflows".into()))?;
        let selection = CoinSelector::select(&candidates, target)?;

        let mut tx = codec.new_transaction(wallet.network());
        for r in &self.recipients {
            codec.add_output(&mut tx, r.amount, &r.address)?;
        }

        // Leftover value goes to a change key that is stored only once the
        // transaction verifies.
        let change_amount = selection.excess();
        let pending_change = if change_amount > 0 {
            let account = wallet.account_key(account_id)?;
            let index = wallet.next_address_index(account_id, CHANGE_BRANCH, MAX_KEY_DEPTH)?;
            let children = [ChildNumber::normal(CHANGE_BRANCH)?, ChildNumber::normal(index)?];
            let preview = wallet.keys.preview(&account, &children)?;
            codec.add_output(&mut tx, change_amount, &preview.address)?;
            Some((account, children))
        } else {
            None
        };

        let mut inputs = Vec::with_capacity(selection.selected.len());
        let mut signers = Vec::with_capacity(selection.selected.len());
        for utxo in selection.selected {
            let owner = wallet.keys.lookup(utxo.key_id)?;
            let secret = owner.signing_key(wallet.deriver())?;
            let input_id = codec.add_input(&mut tx, &utxo.outpoint, &owner.node().public_key)?;
            signers.push((input_id, secret));
            inputs.push(SelectedInput {
                key_id: owner.id(),
                utxo,
            });
        }
        for (input_id, secret) in &signers {
            codec.sign(&mut tx, secret, *input_id)?;
        }
        drop(signers);

        if !codec.verify(&tx) {
            tracing::warn!(wallet_id = wallet.id(), inputs = inputs.len(), "assembled transaction failed verification");
            return Err(WalletError::TransactionVerificationFailed);
        }

        let change = match pending_change {
            Some((account, children)) => {
                let scope = KeyScope {
                    name: "Change".to_string(),
                    account_id,
                    change: CHANGE_BRANCH,
                    purpose: wallet.purpose(),
                };
                let key = wallet.keys.derive_and_register(&account, &children, &scope)?;
                Some(ChangeOutput {
                    address: key.address().to_string(),
                    amount: change_amount,
                    key_id: key.id(),
                })
            }
            None => None,
        };

        tracing::debug!(
            wallet_id = wallet.id(),
            inputs = inputs.len(),
            total_output,
            fee,
            change = change_amount,
            "assembled transaction"
        );
        Ok(DraftTransaction {
            tx,
            inputs,
            fee,
            total_input: selection.total,
            total_output,
            change,
        })
    }
}

impl Wallet {
    /// Assemble a spend with the builder's defaults.
    pub fn create_transaction(
        &mut self,
        recipients: &[(String, u64)],
        account_id: Option<u32>,
        fee: Option<u64>,
        min_confirmations: Option<u64>,
        codec: &dyn TxCodec,
    ) -> Result<DraftTransaction, WalletError> {
        let mut builder = TransactionBuilder::new();
        for (address, amount) in recipients {
            builder.add_output(address.clone(), *amount);
        }
        if let Some(account_id) = account_id {
            builder.account(account_id);
        }
        if let Some(fee) = fee {
            builder.fee(fee);
        }
        if let Some(confirmations) = min_confirmations {
            builder.min_confirmations(confirmations);
        }
        builder.build(self, codec)
    }

    /// Pay `amount` to `to_address`, broadcast, and mark the inputs spent.
    /// Returns the transaction id reported by the chain service.
    pub fn send(
        &mut self,
        to_address: &str,
        amount: u64,
        account_id: Option<u32>,
        fee: Option<u64>,
        chain: &dyn ChainService,
        codec: &dyn TxCodec,
    ) -> Result<String, WalletError> {
        let draft = self.create_transaction(&[(to_address.to_string(), amount)], account_id, fee, None, codec)?;
        let raw = codec.serialize(&draft.tx)?;

        let txid = match chain.broadcast(&raw) {
            Ok(txid) if !txid.is_empty() => txid,
            Ok(_) => return Err(WalletError::BroadcastFailed("empty transaction id".into())),
            Err(e) => return Err(WalletError::BroadcastFailed(e.to_string())),
        };

        let spent = self.store.mark_spent(self.id(), &draft.outpoints())?;
        tracing::info!(wallet_id = self.id(), %txid, amount, fee = draft.fee, spent, "broadcast transaction");
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::WalletConfig;
    use crate::ledger::SyncScope;
    use crate::testing::{MockChain, RejectingCodec};
    use crate::wallet::{CreateOptions, KeyFilter};
    use keytree_core::address::{Address, Network};
    use keytree_core::error::ChainError;
    use keytree_core::hdkey::Ed25519Derivation;
    use keytree_core::store::WalletStore;
    use keytree_core::traits::KeyDerivation;
    use keytree_core::tx::Ed25519TxCodec;
    use keytree_core::types::Hash256;
    use keytree_store::RocksStore;

    struct Funded {
        wallet: Wallet,
        chain: MockChain,
        _dir: tempfile::TempDir,
    }

    fn recipient() -> String {
        Address::from_hash([0xAB; 20], Network::Testnet).encode()
    }

    /// A wallet whose first payment key holds the given outputs, each with 6 confirmations.
    fn funded(values: &[u64]) -> Funded {
        funded_with(CreateOptions::new("spender"), values)
    }

    fn funded_with(options: CreateOptions, values: &[u64]) -> Funded {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn WalletStore> = Arc::new(RocksStore::open(dir.path().join("db")).unwrap());
        let config = WalletConfig {
            network: Network::Testnet,
            ..WalletConfig::default()
        };
        let mut wallet = Wallet::create(store, Arc::new(Ed25519Derivation), config, options).unwrap();
        let key = wallet.new_key(None, None, 0, MAX_KEY_DEPTH).unwrap();
        let chain = MockChain::new();
        for (i, value) in values.iter().enumerate() {
            chain.add_utxo(key.address(), Hash256([i as u8 + 1; 32]), 0, *value, 6);
        }
        wallet.sync_utxos(&chain, SyncScope::default()).unwrap();
        Funded { wallet, chain, _dir: dir }
    }

    /// A watch-only wallet rooted at an account xpub.
    fn watch_only(values: &[u64]) -> Funded {
        let d = Ed25519Derivation;
        let master = d.master_from_seed(&[0x42; 32], Network::Testnet).unwrap();
        let account = [44, 1, 0].into_iter().fold(master, |k, c| d.derive_child(&k, c, true).unwrap());
        funded_with(CreateOptions::new("watcher").key(d.serialize(&account.neutered())), values)
    }

    #[test]
    fn change_goes_to_new_change_key() {
        let mut f = funded(&[150_000]);
        let draft = TransactionBuilder::new()
            .add_output(recipient(), 100_000)
            .fee(30_000)
            .build(&mut f.wallet, &Ed25519TxCodec)
            .unwrap();

        assert_eq!(draft.inputs.len(), 1);
        assert_eq!(draft.total_input, 150_000);
        let change = draft.change.clone().unwrap();
        assert_eq!(change.amount, 20_000);
        assert_eq!(draft.tx.outputs.len(), 2);
        assert_eq!(draft.tx.outputs[1].address, change.address);
        assert!(Ed25519TxCodec.verify(&draft.tx));

        let change_keys = f.wallet.change_keys(0).unwrap();
        assert_eq!(change_keys.len(), 1);
        assert_eq!(change_keys[0].path, "m/44'/1'/0'/1/0");
        assert_eq!(change_keys[0].address, change.address);
        assert_eq!(change_keys[0].name, "Change");
    }

    #[test]
    fn exact_amount_has_no_change() {
        let mut f = funded(&[130_000]);
        let draft = f
            .wallet
            .create_transaction(&[(recipient(), 100_000)], None, Some(30_000), None, &Ed25519TxCodec)
            .unwrap();
        assert!(draft.change.is_none());
        assert_eq!(draft.tx.outputs.len(), 1);
        assert!(f.wallet.change_keys(0).unwrap().is_empty());
    }

    #[test]
    fn default_fee_is_fallback() {
        let mut f = funded(&[200_000]);
        let draft = TransactionBuilder::new()
            .add_output(recipient(), 100_000)
            .build(&mut f.wallet, &Ed25519TxCodec)
            .unwrap();
        assert_eq!(draft.fee, 30_000);
        assert_eq!(draft.change.unwrap().amount, 70_000);
    }

    #[test]
    fn explicit_inputs_unsupported() {
        let mut f = funded(&[200_000]);
        let err = TransactionBuilder::new()
            .add_output(recipient(), 1)
            .inputs(vec![OutPoint::new(Hash256([1; 32]), 0)])
            .build(&mut f.wallet, &Ed25519TxCodec)
            .unwrap_err();
        assert!(matches!(err, WalletError::UnsupportedOperation(_)));
    }

    #[test]
    fn zero_amount_and_empty_outputs_rejected() {
        let mut f = funded(&[200_000]);
        let err = TransactionBuilder::new().build(&mut f.wallet, &Ed25519TxCodec).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
        let err = TransactionBuilder::new()
            .add_output(recipient(), 0)
            .build(&mut f.wallet, &Ed25519TxCodec)
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(msg) if msg.contains(&recipient())));
    }

    #[test]
    fn unconfirmed_outputs_not_spendable() {
        let mut f = funded(&[200_000]);
        let err = TransactionBuilder::new()
            .add_output(recipient(), 1_000)
            .min_confirmations(10)
            .build(&mut f.wallet, &Ed25519TxCodec)
            .unwrap_err();
        assert_eq!(err, WalletError::NoSpendableOutputs { account_id: 0, min_confirmations: 10 });
    }

    #[test]
    fn insufficient_funds_propagates() {
        let mut f = funded(&[50_000, 40_000]);
        let err = TransactionBuilder::new()
            .add_output(recipient(), 100_000)
            .build(&mut f.wallet, &Ed25519TxCodec)
            .unwrap_err();
        assert_eq!(err, WalletError::InsufficientFunds { have: 90_000, need: 130_000 });
    }

    #[test]
    fn multiple_inputs_all_signed() {
        let mut f = funded(&[60_000, 50_000, 40_000]);
        let draft = TransactionBuilder::new()
            .add_output(recipient(), 100_000)
            .fee(10_000)
            .build(&mut f.wallet, &Ed25519TxCodec)
            .unwrap();
        let values: Vec<u64> = draft.inputs.iter().map(|i| i.utxo.value).collect();
        assert_eq!(values, vec![60_000, 50_000]);
        assert!(draft.tx.inputs.iter().all(|i| i.signature.len() == 64));
        assert!(draft.change.is_none());
    }

    #[test]
    fn failed_verification_stores_no_change_key() {
        let mut f = funded(&[150_000]);
        let before = f.wallet.keys(&KeyFilter::default()).unwrap().len();
        let err = TransactionBuilder::new()
            .add_output(recipient(), 100_000)
            .build(&mut f.wallet, &RejectingCodec)
            .unwrap_err();
        assert_eq!(err, WalletError::TransactionVerificationFailed);
        assert_eq!(f.wallet.keys(&KeyFilter::default()).unwrap().len(), before);
    }

    #[test]
    fn public_only_owner_cannot_sign() {
        let mut f = watch_only(&[130_000]);
        let owner = f.wallet.payment_keys(0).unwrap().remove(0);
        assert!(!owner.is_private);
        let before = f.wallet.keys(&KeyFilter::default()).unwrap().len();

        let err = TransactionBuilder::new()
            .add_output(recipient(), 100_000)
            .fee(30_000)
            .build(&mut f.wallet, &Ed25519TxCodec)
            .unwrap_err();
        assert_eq!(err, WalletError::MissingPrivateKey { key_id: owner.id, address: owner.address });
        assert_eq!(f.wallet.keys(&KeyFilter::default()).unwrap().len(), before);
    }

    #[test]
    fn public_only_owner_with_change_stores_no_change_key() {
        let mut f = watch_only(&[150_000]);
        let owner = f.wallet.payment_keys(0).unwrap().remove(0);
        let before = f.wallet.keys(&KeyFilter::default()).unwrap().len();

        let err = TransactionBuilder::new()
            .add_output(recipient(), 100_000)
            .fee(30_000)
            .build(&mut f.wallet, &Ed25519TxCodec)
            .unwrap_err();
        assert_eq!(err, WalletError::MissingPrivateKey { key_id: owner.id, address: owner.address });
        assert_eq!(f.wallet.keys(&KeyFilter::default()).unwrap().len(), before);
        assert!(f.wallet.change_keys(0).unwrap().is_empty());
    }

    #[test]
    fn send_broadcasts_and_marks_spent() {
        let mut f = funded(&[150_000]);
        let txid = f
            .wallet
            .send(&recipient(), 100_000, None, None, &f.chain, &Ed25519TxCodec)
            .unwrap();
        assert_eq!(txid.len(), 64);
        assert_eq!(f.chain.broadcasts().len(), 1);
        assert!(f.wallet.utxos(None, 0).unwrap().is_empty());

        let err = f
            .wallet
            .send(&recipient(), 1_000, None, None, &f.chain, &Ed25519TxCodec)
            .unwrap_err();
        assert!(matches!(err, WalletError::NoSpendableOutputs { .. }));
    }

    #[test]
    fn broadcast_failures_keep_outputs_unspent() {
        let mut f = funded(&[150_000]);
        f.chain.reply_to_broadcast(Err(ChainError::Rejected("bad fee".into())));
        let err = f
            .wallet
            .send(&recipient(), 100_000, None, None, &f.chain, &Ed25519TxCodec)
            .unwrap_err();
        assert_eq!(err, WalletError::BroadcastFailed("rejected by chain service: bad fee".into()));

        f.chain.reply_to_broadcast(Ok(String::new()));
        let err = f
            .wallet
            .send(&recipient(), 100_000, None, None, &f.chain, &Ed25519TxCodec)
            .unwrap_err();
        assert_eq!(err, WalletError::BroadcastFailed("empty transaction id".into()));
        assert_eq!(f.wallet.utxos(None, 0).unwrap().len(), 1);
    }
}
