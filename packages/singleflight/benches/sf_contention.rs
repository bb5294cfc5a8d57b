//! Measures the cost of coalescing under different levels of contention.
//!
//! * `solo` - one caller per call, the common uncontended path (recycles call records).
//! * `distinct_keys` - many threads, each with its own key, so nothing is coalesced.
//! * `thundering_herd` - many threads asking for the same key at the same time.

#![expect(
    missing_docs,
    clippy::cast_possible_truncation,
    reason = "benchmarks"
)]

use std::hint::black_box;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use criterion::{Criterion, criterion_group, criterion_main};
use singleflight::{CancellationToken, Group};

const THREAD_COUNT: usize = 8;

fn entrypoint(c: &mut Criterion) {
    let mut g = c.benchmark_group("sf_contention");

    g.bench_function("solo", |b| {
        let group = Group::<u64, u64, ()>::new();
        let token = CancellationToken::new();

        b.iter(|| {
            black_box(group.execute_blocking(black_box(1), &token, |_| Ok(42)));
        });
    });

    g.bench_function("solo_unpooled", |b| {
        let group = Group::<u64, u64, ()>::builder().pool_capacity(0).build();
        let token = CancellationToken::new();

        b.iter(|| {
            black_box(group.execute_blocking(black_box(1), &token, |_| Ok(42)));
        });
    });

    g.bench_function("distinct_keys", |b| {
        b.iter_custom(|iterations| contended(iterations, |thread_index| thread_index as u64));
    });

    g.bench_function("thundering_herd", |b| {
        b.iter_custom(|iterations| contended(iterations, |_| 0));
    });

    g.finish();
}

/// Runs `iterations` rounds on every worker thread, each thread calling with the key chosen by
/// `key_for_thread`. Returns the wall time of the slowest thread.
fn contended(iterations: u64, key_for_thread: fn(usize) -> u64) -> Duration {
    let group = Group::<u64, u64, ()>::new();
    let barrier = Barrier::new(THREAD_COUNT);

    thread::scope(|s| {
        let workers = (0..THREAD_COUNT)
            .map(|thread_index| {
                let group = &group;
                let barrier = &barrier;

                s.spawn(move || {
                    let key = key_for_thread(thread_index);
                    let token = CancellationToken::new();

                    barrier.wait();
                    let start = Instant::now();

                    for round in 0..iterations {
                        black_box(group.execute_blocking(key, &token, |_| Ok(black_box(round))));
                    }

                    start.elapsed()
                })
            })
            .collect::<Vec<_>>();

        workers
            .into_iter()
            .map(|worker| worker.join().expect("benchmark worker panicked"))
            .max()
            .unwrap_or_default()
    })
}

criterion_group!(benches, entrypoint);
criterion_main!(benches);
