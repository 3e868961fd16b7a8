use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use priostore::{Capacity, PriorityReqStore, ReservablePriorityReqStore};

fn bench_reserve_commit_round_trip(c: &mut Criterion) {
    c.bench_function("grant/reserve_commit_round_trip", |b| {
        b.iter_custom(|iters| {
            let store: ReservablePriorityReqStore<u64> =
                ReservablePriorityReqStore::new(Capacity::bounded(1).unwrap());

            let start = Instant::now();
            for i in 0..iters {
                let slot = store.reserve_put(0).unwrap();
                store.put(&slot, i).unwrap();
                let claim = store.reserve_get(0).unwrap();
                let _ = store.get(&claim).unwrap();
            }
            start.elapsed()
        });
    });
}

fn bench_grant_cascade(c: &mut Criterion) {
    let mut group = c.benchmark_group("grant/cascade");
    const WAITING: u64 = 256;
    group.throughput(Throughput::Elements(WAITING));

    group.bench_function("gets_released_by_puts", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                // Fresh store per iteration so queue depth stays fixed.
                let store: ReservablePriorityReqStore<u64> =
                    ReservablePriorityReqStore::new(Capacity::Unbounded);
                let claims: Vec<_> = (0..WAITING)
                    .map(|i| store.reserve_get(i64::try_from(i % 7).unwrap()).unwrap())
                    .collect();

                let start = Instant::now();
                for i in 0..WAITING {
                    let slot = store.reserve_put(0).unwrap();
                    store.put(&slot, i).unwrap();
                }
                for claim in &claims {
                    let _ = store.get(claim).unwrap();
                }
                total += start.elapsed();
            }
            total
        });
    });

    group.finish();
}

fn bench_direct_handoff(c: &mut Criterion) {
    c.bench_function("grant/direct_handoff", |b| {
        b.iter_custom(|iters| {
            let store: PriorityReqStore<u64> = PriorityReqStore::new(Capacity::bounded(4).unwrap());

            let start = Instant::now();
            for i in 0..iters {
                let get = store.get(0).unwrap();
                store.put(i, 0).unwrap();
                let _ = get.try_take().unwrap();
            }
            start.elapsed()
        });
    });
}

criterion_group!(
    grant,
    bench_reserve_commit_round_trip,
    bench_grant_cascade,
    bench_direct_handoff
);
criterion_main!(grant);
