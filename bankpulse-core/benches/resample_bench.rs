//! Criterion benchmarks for the normalization hot paths.
//!
//! Benchmarks:
//! 1. Resampling 25 years of daily observations under each policy
//! 2. Aligning a dozen monthly series onto one index
//! 3. Reconciling a macro panel onto the store schema

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use bankpulse_core::config::NameConfig;
use bankpulse_core::data::align::align_series;
use bankpulse_core::data::canonicalize::Canonicalizer;
use bankpulse_core::data::resample::{month_range, resample, ResamplePolicy};
use bankpulse_core::data::schema::TargetSchema;
use bankpulse_core::store::reconcile;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_daily(n: usize) -> Vec<(chrono::NaiveDate, f64)> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2000, 7, 1).unwrap();
    (0..n)
        .map(|i| {
            (
                base_date + chrono::Duration::days(i as i64),
                4.0 + (i as f64 * 0.01).sin(),
            )
        })
        .collect()
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    let daily = make_daily(9_131);

    for policy in [ResamplePolicy::Last, ResamplePolicy::Mean, ResamplePolicy::Ffill] {
        group.bench_with_input(
            BenchmarkId::new("daily_25y", format!("{policy:?}")),
            &daily,
            |b, series| b.iter(|| resample(black_box(series), policy)),
        );
    }

    group.finish();
}

fn bench_align(c: &mut Criterion) {
    let daily = make_daily(9_131);
    let monthly = resample(&daily, ResamplePolicy::Mean).unwrap();
    let start = chrono::NaiveDate::from_ymd_opt(2000, 7, 1).unwrap();
    let end = chrono::NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
    let columns: Vec<_> = (0..12)
        .map(|i| (format!("series_{i}"), monthly.clone()))
        .collect();

    c.bench_function("align_12_series", |b| {
        b.iter(|| align_series(month_range(start, end), black_box(columns.clone())))
    });
}

fn bench_reconcile(c: &mut Criterion) {
    let daily = make_daily(9_131);
    let monthly = resample(&daily, ResamplePolicy::Mean).unwrap();
    let start = chrono::NaiveDate::from_ymd_opt(2000, 7, 1).unwrap();
    let end = chrono::NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
    let panel = align_series(
        month_range(start, end),
        vec![
            ("treasury_10y".to_string(), monthly.clone()),
            ("treasury_2y".to_string(), monthly.clone()),
            ("gdp".to_string(), monthly),
        ],
    )
    .unwrap();
    let table = panel.to_frame().unwrap();
    let schema = TargetSchema::economic_data();
    let canon = Canonicalizer::new(&NameConfig::default()).unwrap();

    c.bench_function("reconcile_macro_panel", |b| {
        b.iter(|| reconcile(black_box(&table), &schema, &canon))
    });
}

criterion_group!(benches, bench_resample, bench_align, bench_reconcile);
criterion_main!(benches);
