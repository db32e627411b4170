//! Coin selection.
//!
//! Prefers a single output: the smallest unspent output that covers the
//! target on its own. When no single output is large enough, the smaller
//! outputs are spent largest-first until the target is reached. Ties are
//! broken by outpoint, so the same candidates always yield the same
//! selection.

use std::cmp::Reverse;

use keytree_core::types::Utxo;

use crate::error::WalletError;

/// Outputs chosen to fund a target amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    /// Selected outputs, in the order they were picked.
    pub selected: Vec<Utxo>,
    /// Sum of the selected values.
    pub total: u64,
    /// The amount that had to be covered.
    pub target: u64,
}

impl CoinSelection {
    /// Value left over after the target.
    pub fn excess(&self) -> u64 {
        self.total - self.target
    }
}

/// Deterministic selector over a wallet's unspent outputs.
pub struct CoinSelector;

impl CoinSelector {
    /// Select outputs covering `target`. Spent candidates are ignored.
    pub fn select(candidates: &[Utxo], target: u64) -> Result<CoinSelection, WalletError> {
        if target == 0 {
            return Err(WalletError::InvalidAmount("selection target must be non-zero".into()));
        }

        let unspent = candidates.iter().filter(|u| !u.spent);

        // Smallest single output that covers the target.
        let single = unspent
            .clone()
            .filter(|u| u.value >= target)
            .min_by(|a, b| a.value.cmp(&b.value).then_with(|| a.outpoint.cmp(&b.outpoint)));
        if let Some(utxo) = single {
            return Ok(CoinSelection {
                total: utxo.value,
                selected: vec![utxo.clone()],
                target,
            });
        }

        // Every candidate is below the target here.
        let mut lesser: Vec<&Utxo> = unspent.collect();
        lesser.sort_by(|a, b| {
            Reverse(a.value)
                .cmp(&Reverse(b.value))
                .then_with(|| a.outpoint.cmp(&b.outpoint))
        });

        let mut selected = Vec::new();
        let mut total: u64 = 0;
        for utxo in lesser {
            selected.push(utxo.clone());
            total = total.saturating_add(utxo.value);
            if total >= target {
                return Ok(CoinSelection { selected, total, target });
            }
        }

        Err(WalletError::InsufficientFunds { have: total, need: target })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keytree_core::types::{Hash256, OutPoint};

    fn utxo(tx: u8, value: u64) -> Utxo {
        Utxo {
            outpoint: OutPoint::new(Hash256([tx; 32]), 0),
            wallet_id: 1,
            key_id: 1,
            value,
            confirmations: 10,
            spent: false,
            index: 0,
            script: String::new(),
        }
    }

    fn values(selection: &CoinSelection) -> Vec<u64> {
        selection.selected.iter().map(|u| u.value).collect()
    }

    #[test]
    fn smallest_covering_output_wins() {
        let utxos = vec![utxo(1, 3), utxo(2, 5), utxo(3, 12)];
        let sel = CoinSelector::select(&utxos, 10).unwrap();
        assert_eq!(values(&sel), vec![12]);
        assert_eq!(sel.total, 12);
        assert_eq!(sel.excess(), 2);
    }

    #[test]
    fn prefers_tighter_single_output() {
        let utxos = vec![utxo(1, 40), utxo(2, 11), utxo(3, 25)];
        let sel = CoinSelector::select(&utxos, 10).unwrap();
        assert_eq!(values(&sel), vec![11]);
    }

    #[test]
    fn exact_match_is_single() {
        let utxos = vec![utxo(1, 10), utxo(2, 9)];
        let sel = CoinSelector::select(&utxos, 10).unwrap();
        assert_eq!(values(&sel), vec![10]);
        assert_eq!(sel.excess(), 0);
    }

    #[test]
    fn accumulates_largest_first() {
        let utxos = vec![utxo(1, 3), utxo(2, 5), utxo(3, 4)];
        let sel = CoinSelector::select(&utxos, 10).unwrap();
        assert_eq!(values(&sel), vec![5, 4, 3]);
        assert_eq!(sel.total, 12);
    }

    #[test]
    fn stops_once_covered() {
        let utxos = vec![utxo(1, 6), utxo(2, 5), utxo(3, 1)];
        let sel = CoinSelector::select(&utxos, 10).unwrap();
        assert_eq!(values(&sel), vec![6, 5]);
    }

    #[test]
    fn insufficient_funds() {
        let utxos = vec![utxo(1, 3), utxo(2, 5)];
        let err = CoinSelector::select(&utxos, 10).unwrap_err();
        assert_eq!(err, WalletError::InsufficientFunds { have: 8, need: 10 });
    }

    #[test]
    fn empty_candidates_are_insufficient() {
        let err = CoinSelector::select(&[], 1).unwrap_err();
        assert_eq!(err, WalletError::InsufficientFunds { have: 0, need: 1 });
    }

    #[test]
    fn zero_target_rejected() {
        let err = CoinSelector::select(&[utxo(1, 5)], 0).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
    }

    #[test]
    fn spent_outputs_ignored() {
        let mut big = utxo(1, 100);
        big.spent = true;
        let utxos = vec![big, utxo(2, 4)];
        let err = CoinSelector::select(&utxos, 10).unwrap_err();
        assert_eq!(err, WalletError::InsufficientFunds { have: 4, need: 10 });
    }

    #[test]
    fn ties_broken_by_outpoint() {
        let utxos = vec![utxo(9, 20), utxo(2, 20), utxo(5, 20)];
        let sel = CoinSelector::select(&utxos, 15).unwrap();
        assert_eq!(sel.selected[0].outpoint.tx_hash, Hash256([2; 32]));

        let utxos = vec![utxo(9, 4), utxo(2, 4), utxo(5, 4)];
        let sel = CoinSelector::select(&utxos, 8).unwrap();
        let hashes: Vec<u8> = sel.selected.iter().map(|u| u.outpoint.tx_hash.0[0]).collect();
        assert_eq!(hashes, vec![2, 5]);
    }
}
