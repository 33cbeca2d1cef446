//! Benchmarks for the correlation search and the PLL inner loop
//!
//! Run with: cargo bench --bench phase_lock_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::f32::consts::TAU;

use phasescope::config::{PhaseLockConfig, TrackerConfig};
use phasescope::phase_lock::CorrelationPhaseLocker;
use phasescope::ring_buffer::RingBuffer;
use phasescope::tracker::AdaptivePhaseTracker;

const SAMPLE_RATE: f32 = 48000.0;

fn tone(freq: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 * (TAU * freq * i as f32 / SAMPLE_RATE).sin())
        .collect()
}

fn bench_correlation_search(c: &mut Criterion) {
    let (mut producer, ring) = RingBuffer::with_capacity(16384);
    producer.write(&tone(440.0, 16384));
    let mut locker = CorrelationPhaseLocker::new(PhaseLockConfig::default(), ring);

    c.bench_function("correlation_search_tick", |b| {
        b.iter(|| black_box(locker.tick(black_box(2400))))
    });
}

fn bench_pll_update(c: &mut Criterion) {
    let mut tracker = AdaptivePhaseTracker::new(TrackerConfig::default(), SAMPLE_RATE);
    let window = tone(440.0, 4096);
    tracker.discover(&window);
    let hop = tone(440.0, 1024);

    c.bench_function("pll_update_1024_samples", |b| {
        b.iter(|| tracker.process_samples(black_box(&hop)))
    });
}

fn bench_discovery_tick(c: &mut Criterion) {
    let mut tracker = AdaptivePhaseTracker::new(TrackerConfig::default(), SAMPLE_RATE);
    let window = tone(440.0, 4096);

    c.bench_function("spectral_discovery_tick", |b| {
        b.iter(|| tracker.discover(black_box(&window)))
    });
}

criterion_group!(
    benches,
    bench_correlation_search,
    bench_pll_update,
    bench_discovery_tick
);
criterion_main!(benches);
