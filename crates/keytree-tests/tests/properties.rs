//! Property tests for path normalization and coin selection.
//!
//! Each property runs 256 cases; proptest shrinks failures to a minimal
//! input.

use proptest::prelude::*;

use keytree_core::path::{self, PRIVATE_ROOT, PUBLIC_ROOT};
use keytree_tests::helpers::utxo;
use keytree_wallet::coin_selection::CoinSelector;
use keytree_wallet::error::WalletError;

const MARKERS: [&str; 6] = ["", "'", "H", "h", "P", "p"];

fn segment() -> impl Strategy<Value = (u32, usize)> {
    (0u32..(1 << 31), 0..MARKERS.len())
}

fn raw_path() -> impl Strategy<Value = String> {
    (any::<bool>(), prop::collection::vec(segment(), 0..=5)).prop_map(|(private, segments)| {
        let mut out = String::from(if private { PRIVATE_ROOT } else { PUBLIC_ROOT });
        for (index, marker) in segments {
            out.push('/');
            out.push_str(&index.to_string());
            out.push_str(MARKERS[marker]);
        }
        out
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn normalize_is_idempotent(p in raw_path()) {
        let once = path::normalize(&p).unwrap();
        prop_assert_eq!(path::normalize(&once).unwrap(), once);
    }

    #[test]
    fn normalize_uses_only_apostrophe(p in raw_path()) {
        let normalized = path::normalize(&p).unwrap();
        let markers = p.split('/').skip(1).filter(|s| !s.ends_with(|c: char| c.is_ascii_digit())).count();
        prop_assert_eq!(normalized.matches('\'').count(), markers);
        for s in normalized.split('/').skip(1) {
            prop_assert!(s.ends_with(|c: char| c.is_ascii_digit() || c == '\''));
        }
        prop_assert_eq!(path::depth(&normalized), path::depth(&p));
    }

    #[test]
    fn parse_agrees_with_root(p in raw_path()) {
        let parsed = path::parse(&p).unwrap();
        prop_assert_eq!(parsed.is_private, p.starts_with(PRIVATE_ROOT));
        prop_assert_eq!(parsed.purpose.is_some(), path::depth(&p) >= 1);
        prop_assert_eq!(parsed.address_index.is_some(), path::depth(&p) == 5);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn selection_covers_target_or_reports_shortfall(
        values in prop::collection::vec(1u64..100_000, 1..20),
        target in 1u64..500_000,
    ) {
        let candidates: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| utxo(i as u8, i as u32, *v))
            .collect();
        let available: u64 = values.iter().sum();

        match CoinSelector::select(&candidates, target) {
            Ok(selection) => {
                prop_assert!(available >= target);
                prop_assert!(selection.total >= target);
                prop_assert_eq!(selection.total, selection.selected.iter().map(|u| u.value).sum::<u64>());
                prop_assert_eq!(selection.excess(), selection.total - target);
                for chosen in &selection.selected {
                    prop_assert!(candidates.contains(chosen));
                }
                // A single covering output always wins, and it is the smallest one.
                if let Some(smallest) = values.iter().filter(|v| **v >= target).min() {
                    prop_assert_eq!(selection.selected.len(), 1);
                    prop_assert_eq!(selection.total, *smallest);
                }
            }
            Err(err) => {
                prop_assert!(available < target);
                prop_assert_eq!(err, WalletError::InsufficientFunds { have: available, need: target });
            }
        }
    }

    #[test]
    fn accumulation_stops_at_target(
        values in prop::collection::vec(1u64..1_000, 2..20),
    ) {
        let candidates: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| utxo(i as u8, 0, *v))
            .collect();
        let largest = *values.iter().max().unwrap();
        let available: u64 = values.iter().sum();
        prop_assume!(available > largest);
        let target = largest + 1;

        let selection = CoinSelector::select(&candidates, target).unwrap();
        // Dropping the last pick would fall short.
        let last = selection.selected.last().unwrap().value;
        prop_assert!(selection.total - last < target);
        let picked: Vec<u64> = selection.selected.iter().map(|u| u.value).collect();
        let mut sorted = picked.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        prop_assert_eq!(picked, sorted);
    }
}

#[test]
fn selection_known_cases() {
    let pick = |values: &[u64], target| {
        let candidates: Vec<_> = values.iter().enumerate().map(|(i, v)| utxo(i as u8, 0, *v)).collect();
        CoinSelector::select(&candidates, target).map(|s| s.selected.iter().map(|u| u.value).collect::<Vec<_>>())
    };
    assert_eq!(pick(&[3, 5, 12], 10).unwrap(), vec![12]);
    assert_eq!(pick(&[3, 5, 4], 10).unwrap(), vec![5, 4, 3]);
    assert_eq!(pick(&[3, 5], 10).unwrap_err(), WalletError::InsufficientFunds { have: 8, need: 10 });
}
