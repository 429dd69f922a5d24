//! Benchmarks comparing the incremental hash table to `HashMap`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kvcore::Dict;
use std::collections::HashMap;

fn generate_keys(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("user:{:08}", i).into_bytes()).collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for size in [1_000, 10_000, 100_000] {
        let keys = generate_keys(size);

        group.bench_with_input(BenchmarkId::new("Dict", size), &keys, |b, keys| {
            b.iter(|| {
                let mut d: Dict<Vec<u8>, u64> = Dict::with_seed(0);
                for (i, key) in keys.iter().enumerate() {
                    d.replace(key.clone(), i as u64).unwrap();
                }
                black_box(d)
            });
        });

        group.bench_with_input(BenchmarkId::new("HashMap", size), &keys, |b, keys| {
            b.iter(|| {
                let mut map: HashMap<Vec<u8>, u64> = HashMap::new();
                for (i, key) in keys.iter().enumerate() {
                    map.insert(key.clone(), i as u64);
                }
                black_box(map)
            });
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    for size in [1_000, 10_000, 100_000] {
        let keys = generate_keys(size);

        let mut d: Dict<Vec<u8>, u64> = Dict::with_seed(0);
        let mut map: HashMap<Vec<u8>, u64> = HashMap::new();
        for (i, key) in keys.iter().enumerate() {
            d.replace(key.clone(), i as u64).unwrap();
            map.insert(key.clone(), i as u64);
        }
        // Measure steady state, not the tail of the last rehash.
        while d.rehash(100) {}

        group.bench_with_input(BenchmarkId::new("Dict", size), &keys, |b, keys| {
            b.iter(|| {
                let mut sum = 0u64;
                for key in keys.iter() {
                    if let Some(v) = d.get(key.as_slice()) {
                        sum += v;
                    }
                }
                black_box(sum)
            });
        });

        group.bench_with_input(BenchmarkId::new("HashMap", size), &keys, |b, keys| {
            b.iter(|| {
                let mut sum = 0u64;
                for key in keys.iter() {
                    if let Some(v) = map.get(key.as_slice()) {
                        sum += v;
                    }
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete");
    let size = 10_000;
    let keys = generate_keys(size);

    group.bench_function(BenchmarkId::new("Dict", size), |b| {
        b.iter_batched(
            || {
                let mut d: Dict<Vec<u8>, u64> = Dict::with_seed(0);
                for (i, key) in keys.iter().enumerate() {
                    d.replace(key.clone(), i as u64).unwrap();
                }
                d
            },
            |mut d| {
                for key in keys.iter() {
                    d.delete(key.as_slice());
                }
                black_box(d)
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.bench_function(BenchmarkId::new("HashMap", size), |b| {
        b.iter_batched(
            || {
                keys.iter()
                    .enumerate()
                    .map(|(i, k)| (k.clone(), i as u64))
                    .collect::<HashMap<_, _>>()
            },
            |mut map| {
                for key in keys.iter() {
                    map.remove(key.as_slice());
                }
                black_box(map)
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup, bench_delete);
criterion_main!(benches);
