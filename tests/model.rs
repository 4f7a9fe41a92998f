//! Single-threaded property tests: a sequence of inserts/deletes/range
//! queries is replayed against both the tree and a `BTreeMap`-backed
//! reference model, and every query must agree.

use bwtree::{BwTree, BwTreeConfig};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
enum Op {
    Insert(i32, i32),
    Delete(i32, i32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..64i32, 0..64i32).prop_map(|(k, v)| Op::Insert(k, v)),
        (0..64i32, 0..64i32).prop_map(|(k, v)| Op::Delete(k, v)),
    ]
}

proptest! {
    #[test]
    fn matches_reference_model(ops in prop::collection::vec(op_strategy(), 0..300)) {
        let tree = BwTree::<i32, i32>::with_ord(BwTreeConfig {
            max_chain_len: 3,
            max_node_size: 8,
            min_node_size: 2,
            allow_duplicates: true,
        }).unwrap();
        let mut model: BTreeMap<i32, Vec<i32>> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    tree.insert(k, v);
                    model.entry(k).or_default().push(v);
                }
                Op::Delete(k, v) => {
                    let removed_model = match model.get_mut(&k) {
                        Some(values) => {
                            if let Some(pos) = values.iter().position(|x| *x == v) {
                                values.remove(pos);
                                true
                            } else {
                                false
                            }
                        }
                        None => false,
                    };
                    let removed_tree = tree.delete(&k, &v);
                    prop_assert_eq!(removed_model, removed_tree);
                }
            }
        }

        let mut expected: Vec<(i32, i32)> = model
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (*k, *v)))
            .collect();
        expected.sort();

        let mut actual = tree.search_all();
        actual.sort();

        prop_assert_eq!(actual, expected);

        for k in 0..64i32 {
            let mut expected_values = model.get(&k).cloned().unwrap_or_default();
            expected_values.sort();
            let mut actual_values = tree.search_key(&k);
            actual_values.sort();
            prop_assert_eq!(actual_values, expected_values);
        }
    }
}
