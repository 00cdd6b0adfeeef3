use blockrc::{Shared, Weak};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;

fn bench_new(c: &mut Criterion) {
    c.bench_function("shared::new_in_place", |b| {
        b.iter(|| black_box(Shared::new(black_box([0u64; 4]))))
    });
    c.bench_function("shared::from_box", |b| {
        b.iter_batched(
            || Box::new([0u64; 4]),
            |v| black_box(Shared::from_box(v)),
            BatchSize::SmallInput,
        )
    });
    c.bench_function("std::rc::new", |b| {
        b.iter(|| black_box(std::rc::Rc::new(black_box([0u64; 4]))))
    });
}

fn bench_clone_drop(c: &mut Criterion) {
    let s = Shared::new(42u64);
    c.bench_function("shared::clone_drop", |b| {
        b.iter(|| drop(black_box(s.clone())))
    });
    let w = Shared::downgrade(&s);
    c.bench_function("weak::lock_drop", |b| b.iter(|| drop(black_box(w.lock()))));
}

fn bench_many_handles(c: &mut Criterion) {
    c.bench_function("shared::10k_handles_then_release", |b| {
        b.iter_batched(
            || Shared::new(String::from("payload")),
            |s| {
                let strong: Vec<Shared<String>> = (0..10_000).map(|_| s.clone()).collect();
                let weak: Vec<Weak<String>> = strong.iter().map(Shared::downgrade).collect();
                drop(s);
                drop(strong);
                black_box(weak)
            },
            BatchSize::SmallInput,
        )
    });
}

fn config() -> Criterion {
    Criterion::default()
        .measurement_time(Duration::from_secs(3))
        .warm_up_time(Duration::from_millis(500))
}

criterion_group! {
    name = benches;
    config = config();
    targets = bench_new, bench_clone_drop, bench_many_handles
}
criterion_main!(benches);
