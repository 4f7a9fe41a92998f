//! A latch-free, ordered, multi-valued index built from delta chains
//! linked through an indirection table (component A), the classic
//! Bw-tree design: every structural change -- a single insert, a
//! consolidation, a split, a merge -- lands via one compare-and-swap on
//! that table, never by mutating an already-published node in place.
//!
//! See `SPEC_FULL.md` for the full design; `DESIGN.md` records where
//! each piece of this crate is grounded.

mod consolidate;
mod epoch;
mod error;
mod mapping_table;
mod mutation;
mod node;
mod search;
mod smo;
mod tree;

pub use error::ConfigError;
pub use node::NodeId;
pub use tree::{BwTree, BwTreeConfig, Cursor, EqValueComparator, KeyComparator, OrdKeyComparator, ValueComparator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_search_key_roundtrips() {
        let tree = BwTree::<i32, &'static str>::with_ord(BwTreeConfig::default()).unwrap();
        tree.insert(1, "one");
        tree.insert(2, "two");
        assert_eq!(tree.search_key(&1), vec!["one"]);
        assert_eq!(tree.search_key(&2), vec!["two"]);
        assert!(tree.search_key(&3).is_empty());
    }

    #[test]
    fn duplicate_keys_accumulate_when_allowed() {
        let tree = BwTree::<i32, i32>::with_ord(BwTreeConfig::default()).unwrap();
        tree.insert(5, 1);
        tree.insert(5, 2);
        let mut values = tree.search_key(&5);
        values.sort();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn delete_removes_only_the_matching_value() {
        let tree = BwTree::<i32, i32>::with_ord(BwTreeConfig::default()).unwrap();
        tree.insert(5, 1);
        tree.insert(5, 2);
        assert!(tree.delete(&5, &1));
        assert_eq!(tree.search_key(&5), vec![2]);
        assert!(!tree.delete(&5, &1));
    }

    #[test]
    fn search_range_returns_ordered_entries() {
        let tree = BwTree::<i32, i32>::with_ord(BwTreeConfig::default()).unwrap();
        for k in [5, 1, 3, 2, 4] {
            tree.insert(k, k * 10);
        }
        let all = tree.search_all();
        assert_eq!(all, vec![(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);

        let mid = tree.search_range(Some(&2), Some(&5));
        assert_eq!(mid, vec![(2, 20), (3, 30), (4, 40)]);
    }

    #[test]
    fn cursor_iterates_in_key_order() {
        let tree = BwTree::<i32, i32>::with_ord(BwTreeConfig::default()).unwrap();
        for k in (0..10).rev() {
            tree.insert(k, k);
        }
        let collected: Vec<_> = tree.iter(None, None).collect();
        assert_eq!(collected, (0..10).map(|k| (k, k)).collect::<Vec<_>>());
    }

    #[test]
    fn cursor_follows_sibling_links_across_splits() {
        let config = BwTreeConfig {
            max_chain_len: 4,
            max_node_size: 8,
            min_node_size: 2,
            allow_duplicates: true,
        };
        let tree = BwTree::<i32, i32>::with_ord(config).unwrap();
        for k in 0..100 {
            tree.insert(k, k * 2);
        }
        let collected: Vec<_> = tree.iter(None, None).collect();
        assert_eq!(collected, (0..100).map(|k| (k, k * 2)).collect::<Vec<_>>());

        let bounded: Vec<_> = tree.iter(Some(&30), Some(&40)).collect();
        assert_eq!(bounded, (30..40).map(|k| (k, k * 2)).collect::<Vec<_>>());
    }

    #[test]
    fn insert_return_value_reflects_update_semantics() {
        let multimap = BwTree::<i32, i32>::with_ord(BwTreeConfig::default()).unwrap();
        assert!(multimap.insert(1, 10));
        assert!(multimap.insert(1, 20));

        let config = BwTreeConfig {
            allow_duplicates: false,
            ..BwTreeConfig::default()
        };
        let map = BwTree::<i32, i32>::with_ord(config).unwrap();
        assert!(map.insert(1, 10));
        assert!(!map.insert(1, 20));
        assert_eq!(map.search_key(&1), vec![20]);
    }

    #[test]
    fn splitting_past_max_node_size_keeps_all_entries_reachable() {
        let config = BwTreeConfig {
            max_chain_len: 4,
            max_node_size: 8,
            min_node_size: 2,
            allow_duplicates: true,
        };
        let tree = BwTree::<i32, i32>::with_ord(config).unwrap();
        for k in 0..200 {
            tree.insert(k, k);
        }
        assert_eq!(tree.len_hint(), 200);
        for k in 0..200 {
            assert_eq!(tree.search_key(&k), vec![k]);
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = BwTreeConfig {
            max_chain_len: 0,
            ..BwTreeConfig::default()
        };
        assert!(BwTree::<i32, i32>::with_ord(bad).is_err());
    }
}
