//! Property-based tests for keyed child reconciliation.
//!
//! 1. The committed host children follow the new key order.
//! 2. Every removed key is deleted once and every new key placed once.
//! 3. Retained children off one longest increasing run of old positions
//!    move; the rest stay put.
//! 4. Retained keys in unchanged relative order never move.

mod common;

use std::collections::HashSet;

use common::{fixture, keyed_list};
use proptest::prelude::*;

fn keys_strategy() -> impl Strategy<Value = Vec<u32>> {
    proptest::sample::subsequence((0..12).collect::<Vec<u32>>(), 0..=12).prop_shuffle()
}

fn expected_markup(keys: &[String]) -> String {
    let items: String = keys.iter().map(|k| format!("<li>{k}</li>")).collect();
    format!("<ul>{items}</ul>")
}

fn lis_len(seq: &[usize]) -> usize {
    let mut best = vec![1usize; seq.len()];
    for i in 0..seq.len() {
        for j in 0..i {
            if seq[j] < seq[i] {
                best[i] = best[i].max(best[j] + 1);
            }
        }
    }
    best.into_iter().max().unwrap_or(0)
}

fn names(keys: &[u32]) -> Vec<String> {
    keys.iter().map(|k| format!("k{k}")).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn keyed_diff_matches_target(old in keys_strategy(), new in keys_strategy()) {
        let old = names(&old);
        let new = names(&new);
        let old_refs: Vec<&str> = old.iter().map(String::as_str).collect();
        let new_refs: Vec<&str> = new.iter().map(String::as_str).collect();

        let mut fx = fixture();
        fx.root.render(keyed_list(&old_refs));
        fx.root.flush_all().unwrap();
        fx.clear_ops();

        fx.root.render(keyed_list(&new_refs));
        fx.root.flush_all().unwrap();
        prop_assert_eq!(fx.markup(), expected_markup(&new));

        let old_set: HashSet<&String> = old.iter().collect();
        let new_set: HashSet<&String> = new.iter().collect();
        let removed = old.iter().filter(|k| !new_set.contains(k)).count();
        let added = new.iter().filter(|k| !old_set.contains(k)).count();
        let retained: Vec<&String> = new.iter().filter(|k| old_set.contains(k)).collect();

        let summary = fx.root.last_commit().unwrap().clone();
        prop_assert_eq!(summary.deletions(), removed);
        prop_assert_eq!(summary.placements(), added);
        prop_assert_eq!(fx.root.host().count("create"), added);
        let old_positions: Vec<usize> = retained
            .iter()
            .filter_map(|k| old.iter().position(|o| o == *k))
            .collect();
        prop_assert_eq!(summary.moves(), retained.len() - lis_len(&old_positions));

        let retained_in_old: Vec<&String> = old.iter().filter(|k| new_set.contains(k)).collect();
        if retained == retained_in_old {
            prop_assert_eq!(summary.moves(), 0);
        }
    }

    #[test]
    fn interrupted_diff_commits_same_tree(
        old in keys_strategy(),
        new in keys_strategy(),
        units in 1u32..6,
    ) {
        let old = names(&old);
        let new = names(&new);
        let old_refs: Vec<&str> = old.iter().map(String::as_str).collect();
        let new_refs: Vec<&str> = new.iter().map(String::as_str).collect();

        let mut fx = fixture();
        fx.root.render(keyed_list(&old_refs));
        fx.root.flush_all().unwrap();
        let before = fx.markup();
        fx.clear_ops();

        fx.root.render(keyed_list(&new_refs));
        let status = fx.root.perform_work(frx_reconciler::WorkBudget::Units(units)).unwrap();
        if status == frx_reconciler::WorkStatus::Yielded {
            // Nothing reaches the host before the commit.
            prop_assert!(fx.root.host().ops().is_empty());
            prop_assert_eq!(fx.markup(), before);
            fx.root.abandon_work();
        }
        fx.root.flush_all().unwrap();
        prop_assert_eq!(fx.markup(), expected_markup(&new));
    }
}
