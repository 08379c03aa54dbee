//! Property tests for pipeline invariants.
//!
//! Uses proptest to verify:
//! 1. Resampling an already-monthly series is a no-op under every policy
//! 2. Forward fill never reaches months before the first observation
//! 3. Spread is the difference where both operands exist, null otherwise
//! 4. Name canonicalization is deterministic and idempotent; overrides win
//! 5. Upserting the same table twice leaves the same store state

use chrono::{Datelike, Months, NaiveDate};
use polars::prelude::{Column, DataFrame};
use proptest::prelude::*;

use bankpulse_core::config::{NameConfig, NameOverride};
use bankpulse_core::data::align::{difference, reindex};
use bankpulse_core::data::canonicalize::Canonicalizer;
use bankpulse_core::data::resample::{month_range, month_start, resample, ResamplePolicy};
use bankpulse_core::data::schema::{ConflictPolicy, TargetSchema};
use bankpulse_core::domain::{frame, CertNumber};
use bankpulse_core::store::Store;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_month() -> impl Strategy<Value = NaiveDate> {
    (1990i32..2030, 1u32..=12).prop_map(|(y, m)| NaiveDate::from_ymd_opt(y, m, 1).unwrap())
}

fn arb_value() -> impl Strategy<Value = f64> {
    (-1000.0..1000.0_f64).prop_map(|v| (v * 100.0).round() / 100.0)
}

fn arb_policy() -> impl Strategy<Value = ResamplePolicy> {
    prop_oneof![
        Just(ResamplePolicy::Last),
        Just(ResamplePolicy::Mean),
        Just(ResamplePolicy::Ffill),
    ]
}

fn arb_monthly() -> impl Strategy<Value = Vec<(NaiveDate, f64)>> {
    (arb_month(), prop::collection::vec(arb_value(), 1..60)).prop_map(|(start, values)| {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (start + Months::new(i as u32), v))
            .collect()
    })
}

fn arb_optional() -> impl Strategy<Value = Option<f64>> {
    prop::option::of(arb_value())
}

fn arb_bank_name() -> impl Strategy<Value = String> {
    "[A-Za-z ,.-]{0,40}".prop_map(|s| s)
}

fn canon() -> Canonicalizer {
    Canonicalizer::new(&NameConfig::default()).unwrap()
}

// ── 1. Monthly input is a fixed point ───────────────────────────────

proptest! {
    #[test]
    fn monthly_series_is_unchanged(series in arb_monthly(), policy in arb_policy()) {
        let out = resample(&series, policy).unwrap();
        let expected: Vec<(NaiveDate, Option<f64>)> =
            series.iter().map(|(d, v)| (*d, Some(*v))).collect();
        prop_assert_eq!(out, expected);
    }
}

// ── 2. Forward fill has no leading fill ─────────────────────────────

proptest! {
    #[test]
    fn ffill_never_precedes_first_observation(
        first in arb_month(),
        day in 1u32..=28,
        values in prop::collection::vec(arb_value(), 1..20),
        lead in 0u32..24,
    ) {
        let series: Vec<(NaiveDate, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let month = first + Months::new(3 * i as u32);
                (month.with_day(day).unwrap(), *v)
            })
            .collect();
        let monthly = resample(&series, ResamplePolicy::Ffill).unwrap();
        prop_assert_eq!(monthly[0].0, month_start(series[0].0));

        let last = series[series.len() - 1].0;
        let index = month_range(first - Months::new(lead), last);
        let aligned = reindex(&index, &monthly);
        for (date, value) in index.iter().zip(&aligned) {
            if *date < first {
                prop_assert!(value.is_none());
            } else if *date > first {
                prop_assert!(value.is_some());
            }
        }
    }
}

// ── 3. Spread ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn spread_is_pointwise_difference(
        pairs in prop::collection::vec((arb_optional(), arb_optional()), 0..50)
    ) {
        let (a, b): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        let spread = difference(&a, &b);
        prop_assert_eq!(spread.len(), a.len());
        for i in 0..a.len() {
            match (a[i], b[i]) {
                (Some(x), Some(y)) => prop_assert_eq!(spread[i], Some(x - y)),
                _ => prop_assert_eq!(spread[i], None),
            }
        }
    }
}

// ── 4. Canonicalization ─────────────────────────────────────────────

proptest! {
    #[test]
    fn cleaning_is_idempotent(raw in arb_bank_name()) {
        let c = canon();
        let once = c.clean(&raw);
        prop_assert_eq!(c.clean(&once), once.clone());
        prop_assert_eq!(c.clean(&raw), once);
    }

    #[test]
    fn canonical_name_is_stable(cert in 1u32..100_000, raw in prop::option::of(arb_bank_name())) {
        let c = canon();
        let first = c.canonical_name(CertNumber(cert), raw.as_deref());
        prop_assert_eq!(c.canonical_name(CertNumber(cert), raw.as_deref()), first.clone());
        prop_assert_eq!(c.canonical_name(CertNumber(cert), Some(&first)), first);
    }

    #[test]
    fn overrides_always_win(cert in 1u32..100_000, raw in prop::option::of(arb_bank_name())) {
        let mut names = NameConfig::default();
        names.overrides.retain(|o| o.cert != CertNumber(cert));
        names.overrides.push(NameOverride { cert: CertNumber(cert), name: "Pinned Name".into() });
        let c = Canonicalizer::new(&names).unwrap();
        prop_assert_eq!(c.canonical_name(CertNumber(cert), raw.as_deref()), "Pinned Name");
    }
}

// ── 5. Upsert idempotence ───────────────────────────────────────────

fn macro_table(start: NaiveDate, rows: &[(Option<f64>, Option<f64>)]) -> DataFrame {
    let months = (0..rows.len()).map(|i| Some(start + Months::new(i as u32)));
    DataFrame::new(vec![
        frame::date_column("date", months).unwrap(),
        Column::new("cpi".into(), rows.iter().map(|r| r.0).collect::<Vec<_>>()),
        Column::new("housing_starts".into(), rows.iter().map(|r| r.1).collect::<Vec<_>>()),
    ])
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn upsert_twice_equals_upsert_once(
        start in arb_month(),
        rows in prop::collection::vec((arb_optional(), arb_optional()), 1..40),
        chunk in 1usize..20,
        keep in any::<bool>(),
    ) {
        let policy = if keep { ConflictPolicy::KeepExisting } else { ConflictPolicy::Overwrite };
        let schema = TargetSchema::economic_data();
        let table = macro_table(start, &rows);
        let mut store = Store::open_in_memory().unwrap();

        store.upsert(&table, &schema, policy, chunk).unwrap();
        let once = store.load_table(&schema).unwrap();
        let second = store.upsert(&table, &schema, policy, chunk).unwrap();
        prop_assert_eq!(second.inserted, 0);
        prop_assert!(store.load_table(&schema).unwrap().equals_missing(&once));
    }
}
