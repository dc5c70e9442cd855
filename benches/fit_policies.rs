//! # Fit Policy Benchmark
//!
//! Same seeded churn of allocations and frees against first-fit and best-fit
//! pools.
//!
//! Run with: `cargo bench --bench fit_policies`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mempool::{Allocation, FitPolicy, Pool};
use rand::{Rng, SeedableRng, rngs::StdRng};

const POOL_SIZE: usize = 1 << 20;

/// Operations per iteration.
const OPERATIONS: usize = 10_000;

fn churn(policy: FitPolicy) -> usize {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut pool = Pool::open(POOL_SIZE, policy).unwrap();
    let mut live: Vec<Allocation> = Vec::with_capacity(OPERATIONS);

    for _ in 0..OPERATIONS {
        if live.is_empty() || rng.gen_bool(0.55) {
            if let Ok(allocation) = pool.allocate(rng.gen_range(16..=1024)) {
                live.push(allocation);
            }
        } else {
            let allocation = live.swap_remove(rng.gen_range(0..live.len()));
            pool.deallocate(allocation).unwrap();
        }
    }

    pool.stats().num_gaps
}

fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("churn");

    for policy in [FitPolicy::FirstFit, FitPolicy::BestFit] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{policy:?}")),
            &policy,
            |b, &policy| b.iter(|| black_box(churn(policy))),
        );
    }

    group.finish();
}

fn bench_open_close(c: &mut Criterion) {
    c.bench_function("open_close_1MiB", |b| {
        b.iter(|| {
            let pool = Pool::open(black_box(POOL_SIZE), FitPolicy::BestFit).unwrap();
            pool.close().unwrap();
        });
    });
}

criterion_group!(benches, bench_churn, bench_open_close);
criterion_main!(benches);
