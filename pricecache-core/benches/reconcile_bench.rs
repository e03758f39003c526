//! Criterion benchmarks for PriceCache hot paths.
//!
//! Benchmarks:
//! 1. Range classification over many cached intervals
//! 2. Point merge (cached + fetched gap)
//! 3. Store lookup with many entries per key
//! 4. Reconciler cache hit (lookup + slice, no source call)

use chrono::{Duration, NaiveDate, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pricecache_core::classify::classify;
use pricecache_core::domain::{CacheKey, Interval, PricePoint, PriceSeries};
use pricecache_core::reconcile::{merge_points, Reconciler};
use pricecache_core::source::SyntheticSource;
use pricecache_core::store::CacheStore;
use std::sync::Arc;

// ── Helpers ──────────────────────────────────────────────────────────

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 1, 1).unwrap()
}

fn interval(offset: i64, len: i64) -> Interval {
    let start = base() + Duration::days(offset);
    Interval::new(start, start + Duration::days(len)).unwrap()
}

fn points(offset: i64, n: usize) -> Vec<PricePoint> {
    (0..n)
        .map(|i| {
            PricePoint::new(
                base() + Duration::days(offset + i as i64),
                100.0 + (i as f64 * 0.1).sin() * 10.0,
            )
        })
        .collect()
}

// ── 1. Classifier ────────────────────────────────────────────────────

fn bench_classify(c: &mut Criterion) {
    let cached: Vec<Interval> = (0..1_000).map(|i| interval(i * 3, 90 + i % 200)).collect();
    let requested = interval(1_200, 365);

    c.bench_function("classify_1000_intervals", |b| {
        b.iter(|| {
            cached
                .iter()
                .map(|c| classify(black_box(c), black_box(&requested)))
                .filter(|m| !m.is_miss())
                .count()
        })
    });
}

// ── 2. Merge ─────────────────────────────────────────────────────────

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_points");

    for &n in &[252usize, 2_520, 25_200] {
        let cached = points(0, n);
        let fetched = points(n as i64, n / 10);
        group.bench_with_input(BenchmarkId::new("append_gap", n), &n, |b, _| {
            b.iter(|| merge_points(black_box(&cached), black_box(&fetched)))
        });
    }

    group.finish();
}

// ── 3. Store lookup ──────────────────────────────────────────────────

fn bench_lookup(c: &mut Criterion) {
    let store = CacheStore::in_memory();
    let key = CacheKey::new("SPY", "Close").unwrap();
    for i in 0..50 {
        let iv = interval(i * 30, 29);
        let series = PriceSeries::new("SPY", "Close", points(i * 30, 30));
        store.persist(&key, iv, &series, Utc::now()).unwrap();
    }
    let requested = interval(600, 20);

    c.bench_function("store_lookup_50_entries", |b| {
        b.iter(|| store.lookup(black_box(&key), black_box(&requested)))
    });
}

// ── 4. Reconciler cache hit ──────────────────────────────────────────

fn bench_cache_hit(c: &mut Criterion) {
    let reconciler = Reconciler::new(Arc::new(CacheStore::in_memory()), Arc::new(SyntheticSource::new()));
    let cached = interval(0, 365 * 5);
    reconciler.fetch_range("SPY", "Close", cached).unwrap();
    let requested = interval(400, 90);

    c.bench_function("reconcile_contains_hit", |b| {
        b.iter(|| reconciler.fetch_range("SPY", "Close", black_box(requested)).unwrap())
    });
}

criterion_group!(benches, bench_classify, bench_merge, bench_lookup, bench_cache_hit);
criterion_main!(benches);
