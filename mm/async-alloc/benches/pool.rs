//! Pool allocator benchmarks.
//!
//! Run with: cargo bench -p async-alloc --bench pool

use std::{hint::black_box, ptr::NonNull};

use async_alloc::{Allocator, PageOptions, PoolOptions};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::SmallRng};

fn bench_alloc_free_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free_pair");
    let pool = Allocator::create(1 << 20, PoolOptions::new()).unwrap();

    for size in [16usize, 256, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let ptr = pool.alloc(black_box(size)).unwrap();
                pool.dealloc(ptr).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_random_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_workload");

    for live in [16usize, 256] {
        group.bench_with_input(BenchmarkId::new("live", live), &live, |b, &live| {
            let pool = Allocator::create(4 << 20, PoolOptions::new()).unwrap();
            let mut rng = SmallRng::seed_from_u64(0x5eed);
            let mut slots: Vec<Option<NonNull<u8>>> = vec![None; live];
            b.iter(|| {
                let slot = &mut slots[rng.gen_range(0..live)];
                match slot.take() {
                    Some(ptr) => pool.dealloc(ptr).unwrap(),
                    None => *slot = pool.alloc(rng.gen_range(1..2048)).ok(),
                }
            });
            for ptr in slots.into_iter().flatten() {
                pool.dealloc(ptr).unwrap();
            }
        });
    }
    group.finish();
}

fn bench_create_destroy(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_destroy");

    group.bench_function("guarded", |b| {
        b.iter(|| black_box(Allocator::create(64 << 10, PoolOptions::new()).unwrap()));
    });
    group.bench_function("unguarded", |b| {
        let options = PoolOptions::new().with_guards(PageOptions::empty());
        b.iter(|| black_box(Allocator::create(64 << 10, options).unwrap()));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_pair,
    bench_random_workload,
    bench_create_destroy
);
criterion_main!(benches);
