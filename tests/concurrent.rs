//! Concurrent smoke test: many threads insert disjoint key ranges,
//! half the threads then delete their range, and every thread finally
//! reads back the keys it expects to still be present.

use bwtree::{BwTree, BwTreeConfig};
use rand::prelude::*;

const THREADS: i32 = 16;
const ELEMENTS_PER_THREAD: i32 = 500;

#[test]
fn concurrent_insert_delete_get() {
    let _ = env_logger::try_init();
    let tree = &BwTree::<i32, i32>::with_ord(BwTreeConfig {
        max_chain_len: 4,
        max_node_size: 32,
        min_node_size: 8,
        allow_duplicates: false,
    })
    .unwrap();

    crossbeam_utils::thread::scope(|s| {
        for t in 0..THREADS {
            s.spawn(move |_| {
                let mut rng = rand::thread_rng();
                let mut keys: Vec<i32> = (0..ELEMENTS_PER_THREAD).map(|k| k * THREADS + t).collect();
                keys.shuffle(&mut rng);
                for k in keys {
                    tree.insert(k, k);
                }
            });
        }
    })
    .unwrap();

    crossbeam_utils::thread::scope(|s| {
        for t in 0..(THREADS / 2) {
            s.spawn(move |_| {
                let mut rng = rand::thread_rng();
                let mut keys: Vec<i32> = (0..ELEMENTS_PER_THREAD).map(|k| k * THREADS + t).collect();
                keys.shuffle(&mut rng);
                for k in keys {
                    assert!(tree.delete(&k, &k));
                }
            });
        }
    })
    .unwrap();

    crossbeam_utils::thread::scope(|s| {
        for t in 0..THREADS {
            s.spawn(move |_| {
                let mut rng = rand::thread_rng();
                let mut keys: Vec<i32> = (0..ELEMENTS_PER_THREAD).map(|k| k * THREADS + t).collect();
                keys.shuffle(&mut rng);
                for k in keys {
                    let found = tree.search_key(&k);
                    if t < THREADS / 2 {
                        assert!(found.is_empty(), "key {k} should have been deleted");
                    } else {
                        assert_eq!(found, vec![k]);
                    }
                }
            });
        }
    })
    .unwrap();

    let remaining = (THREADS / 2) as usize * ELEMENTS_PER_THREAD as usize;
    assert_eq!(tree.len_hint(), remaining);
}
