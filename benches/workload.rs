use bwtree::{BwTree, BwTreeConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;

fn build_tree(n: i32) -> BwTree<i32, i32> {
    let tree = BwTree::with_ord(BwTreeConfig::default()).unwrap();
    let mut keys: Vec<i32> = (0..n).collect();
    keys.shuffle(&mut rand::thread_rng());
    for k in keys {
        tree.insert(k, k);
    }
    tree
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert_100k_sequential", |b| {
        b.iter(|| {
            let tree = BwTree::<i32, i32>::with_ord(BwTreeConfig::default()).unwrap();
            for k in 0..100_000 {
                tree.insert(black_box(k), k);
            }
        })
    });
}

fn bench_point_search(c: &mut Criterion) {
    let tree = build_tree(100_000);
    c.bench_function("search_key_hit", |b| {
        b.iter(|| black_box(tree.search_key(black_box(&42_123))))
    });
}

fn bench_range_scan(c: &mut Criterion) {
    let tree = build_tree(100_000);
    c.bench_function("search_range_1k", |b| {
        b.iter(|| black_box(tree.search_range(Some(&black_box(10_000)), Some(&black_box(11_000)))))
    });
}

criterion_group!(benches, bench_insert, bench_point_search, bench_range_scan);
criterion_main!(benches);
