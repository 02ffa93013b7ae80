use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::{Arc, Weak};
use std::time::Duration;
use weaklayer::WeakTable;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn bench_insert_100k(c: &mut Criterion) {
    c.bench_function("weak_table::insert_100k", |b| {
        let owners: Vec<Arc<u64>> = lcg(1).take(100_000).map(Arc::new).collect();
        b.iter_batched(
            WeakTable::<Weak<u64>>::new,
            |mut t| {
                for o in &owners {
                    t.insert(**o, Arc::downgrade(o));
                }
                black_box(t)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_find_hit(c: &mut Criterion) {
    c.bench_function("weak_table::find_hit", |b| {
        let owners: Vec<Arc<u64>> = lcg(7).take(20_000).map(Arc::new).collect();
        let mut t = WeakTable::new();
        for o in &owners {
            t.insert(**o, Arc::downgrade(o));
        }
        let mut it = owners.iter().cycle();
        b.iter(|| {
            let o = it.next().unwrap();
            black_box(t.find(**o, |w: &Weak<u64>| w.ptr_eq(&Arc::downgrade(o))));
        })
    });
}

fn bench_drain_dead_half(c: &mut Criterion) {
    c.bench_function("weak_table::drain_dead_half_of_100k", |b| {
        b.iter_batched(
            || {
                let mut owners: Vec<Arc<u64>> = lcg(3).take(100_000).map(Arc::new).collect();
                let mut t = WeakTable::new();
                for o in &owners {
                    t.insert(**o, Arc::downgrade(o));
                }
                // Every other owner goes away.
                let mut i = 0;
                owners.retain(|_| {
                    i += 1;
                    i % 2 == 0
                });
                (t, owners)
            },
            |(mut t, owners)| {
                let dead = t.drain_dead();
                black_box((dead.len(), t.len(), owners))
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_insert_100k, bench_find_hit, bench_drain_dead_half
}
criterion_main!(benches);
