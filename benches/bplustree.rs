//! B+Tree benchmarks: insert throughput and scan speed over triple keys.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tdb_storage::buffer::BlockManager;
use tdb_storage::common::BlockId;
use tdb_storage::index::{BPlusTree, RecordFactory, WriteContext};
use tdb_storage::storage::BlockFile;

const BLOCK_SIZE: usize = 8192;

fn create_tree() -> BPlusTree {
    let blocks = BlockManager::new(BlockFile::memory("bench.idx", BLOCK_SIZE), 1024, None);
    BPlusTree::new(blocks, RecordFactory::new(24, 0)).unwrap()
}

/// Big-endian (s, p, o) key.
fn key(s: u64, p: u64, o: u64) -> [u8; 24] {
    let mut k = [0u8; 24];
    k[..8].copy_from_slice(&s.to_be_bytes());
    k[8..16].copy_from_slice(&p.to_be_bytes());
    k[16..].copy_from_slice(&o.to_be_bytes());
    k
}

fn build(keys: &[[u8; 24]]) -> (BPlusTree, BlockId) {
    let tree = create_tree();
    let root = tree.create_root(0).unwrap();
    let mut ctx = WriteContext::new(root, 1);
    for k in keys {
        tree.insert(&mut ctx, k).unwrap();
    }
    let root = tree.commit(ctx);
    (tree, root)
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("bplustree_insert");

    for count in [1_000u64, 10_000].iter() {
        group.throughput(Throughput::Elements(*count));

        let sequential: Vec<[u8; 24]> = (0..*count).map(|i| key(i / 100, i % 100, i)).collect();
        group.bench_with_input(BenchmarkId::new("sequential", count), &sequential, |b, keys| {
            b.iter(|| build(keys));
        });

        let mut rng = StdRng::seed_from_u64(7);
        let random: Vec<[u8; 24]> = (0..*count)
            .map(|_| key(rng.gen_range(0..500), rng.gen_range(0..50), rng.gen()))
            .collect();
        group.bench_with_input(BenchmarkId::new("random", count), &random, |b, keys| {
            b.iter(|| build(keys));
        });
    }

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("bplustree_scan");

    let keys: Vec<[u8; 24]> = (0..100_000u64).map(|i| key(i / 1000, i % 1000, i)).collect();
    let (tree, root) = build(&keys);

    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("full", |b| {
        b.iter(|| black_box(tree.iter(root).count()));
    });

    group.throughput(Throughput::Elements(1000));
    group.bench_function("prefix", |b| {
        let prefix = 42u64.to_be_bytes();
        b.iter(|| black_box(tree.find(root, &prefix).count()));
    });

    group.bench_function("point", |b| {
        let wanted = key(42, 7, 42_007);
        b.iter(|| black_box(tree.contains(root, &wanted).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_scan);
criterion_main!(benches);
