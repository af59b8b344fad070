//! Timer queue churn benchmarks.

use criterion::{criterion_group, criterion_main, Criterion};
use revent::timer::TimerQueue;
use std::time::{Duration, Instant};

fn bench_schedule_then_drain(c: &mut Criterion) {
    c.bench_function("schedule_1k_then_drain", |b| {
        b.iter(|| {
            let mut queue = TimerQueue::new();
            let base = Instant::now();
            for i in 0..1_000u64 {
                // scattered deadlines so insertion exercises the search
                let offset = Duration::from_micros((i * 7919) % 10_000);
                queue.schedule_at(base + offset, Box::new(|| {}));
            }
            let mut fired = 0;
            while let Some(callback) = queue.pop_due(base + Duration::from_millis(20)) {
                callback();
                fired += 1;
            }
            assert_eq!(fired, 1_000);
        })
    });
}

fn bench_schedule_cancel(c: &mut Criterion) {
    c.bench_function("schedule_1k_cancel_all", |b| {
        b.iter(|| {
            let mut queue = TimerQueue::new();
            let base = Instant::now();
            let handles: Vec<_> = (0..1_000u64)
                .map(|i| {
                    let offset = Duration::from_micros((i * 7919) % 10_000);
                    queue.schedule_at(base + offset, Box::new(|| {}))
                })
                .collect();
            for handle in handles {
                assert!(queue.cancel(handle));
            }
            assert!(queue.is_empty());
        })
    });
}

criterion_group!(benches, bench_schedule_then_drain, bench_schedule_cancel);
criterion_main!(benches);
