//! Context switch and timer benchmarks

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use costack_runtime::{Coroutine, SharedStack, TimerManager};

fn bench_resume_yield(c: &mut Criterion) {
    let stack = SharedStack::new(256 * 1024).unwrap();
    let co = Coroutine::new(&stack, |co| loop {
        co.yield_now();
    });

    c.bench_function("resume_yield_round_trip", |b| {
        b.iter(|| co.resume());
    });
}

#[inline(never)]
fn deep_yield(co: &Coroutine, depth: usize) -> usize {
    let frame = black_box([depth; 16]);
    if depth == 0 {
        co.yield_now();
        return frame[0];
    }
    deep_yield(co, depth - 1) + frame[1]
}

fn bench_deep_stack_copy(c: &mut Criterion) {
    let stack = SharedStack::new(1024 * 1024).unwrap();
    let co = Coroutine::new(&stack, |co| loop {
        black_box(deep_yield(co, 64));
    });

    c.bench_function("resume_yield_64_frames", |b| {
        b.iter(|| co.resume());
    });
}

fn bench_coroutine_lifecycle(c: &mut Criterion) {
    let stack = SharedStack::new(256 * 1024).unwrap();
    let counter = Rc::new(Cell::new(0u64));

    c.bench_function("create_run_to_completion", |b| {
        b.iter(|| {
            let counter = counter.clone();
            let co = Coroutine::new(&stack, move |_| counter.set(counter.get() + 1));
            co.resume();
        });
    });
}

fn bench_timer_step(c: &mut Criterion) {
    c.bench_function("timer_add_step_1000", |b| {
        b.iter_batched(
            || {
                let mut tm = TimerManager::new();
                for i in 0..1000u64 {
                    tm.add_timer(i % 97, || {});
                }
                tm
            },
            |mut tm| {
                for t in tm.step(100) {
                    t.fire();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_resume_yield,
    bench_deep_stack_copy,
    bench_coroutine_lifecycle,
    bench_timer_step
);
criterion_main!(benches);
