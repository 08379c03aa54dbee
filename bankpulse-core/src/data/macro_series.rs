//! Macro panel assembly: fetch, resample, align, derive.

use chrono::NaiveDate;

use super::align::{align_series, difference};
use super::provider::{DataError, MacroProvider};
use super::resample::{month_range, pct_change, prepare, resample, ResamplePolicy};
use super::schema::SchemaError;
use crate::config::MacroConfig;
use crate::domain::MonthlyPanel;

/// Build the monthly macro panel described by `config`.
///
/// Any provider failure aborts the whole fetch; a partial panel is never
/// returned.
pub fn fetch_macro_panel(
    provider: &dyn MacroProvider,
    config: &MacroConfig,
) -> Result<MonthlyPanel, DataError> {
    let index = month_range(config.start, config.end);
    let mut columns: Vec<(String, Vec<(NaiveDate, Option<f64>)>)> = Vec::new();

    for spec in &config.series {
        let raw = provider.observations(&spec.series_id, config.start, config.end)?;
        if raw.is_empty() {
            tracing::warn!(series = %spec.series_id, column = %spec.column, "series returned no observations");
        }
        let monthly = resample(&prepare(&raw), spec.policy)?;
        tracing::debug!(column = %spec.column, months = monthly.len(), policy = ?spec.policy, "resampled");
        columns.push((spec.column.clone(), monthly));
    }

    if let Some(growth) = &config.growth {
        let level = prepare(&provider.observations(&growth.series_id, config.start, config.end)?);
        let monthly = resample(&pct_change(&level), ResamplePolicy::Ffill)?;
        columns.push((growth.column.clone(), monthly));
    }

    let mut panel = align_series(index, columns)?;

    if let Some(spread) = &config.spread {
        let minuend = panel
            .column(&spread.minuend)
            .ok_or_else(|| SchemaError::MissingColumn(spread.minuend.clone()))?;
        let subtrahend = panel
            .column(&spread.subtrahend)
            .ok_or_else(|| SchemaError::MissingColumn(spread.subtrahend.clone()))?;
        let values = difference(minuend, subtrahend);
        panel.insert(&spread.column, values)?;
    }

    if let Some(growth) = &config.growth {
        let nonzero = panel
            .column(&growth.column)
            .map(|v| v.iter().filter(|x| x.is_some_and(|x| x.abs() > 1e-4)).count())
            .unwrap_or(0);
        tracing::info!(column = %growth.column, nonzero, "growth column populated");
    }

    tracing::info!(
        provider = provider.name(),
        months = panel.dates.len(),
        columns = panel.columns.len(),
        "macro panel assembled"
    );
    Ok(panel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GrowthSpec, SeriesSpec, SpreadSpec};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    struct FakeFred(HashMap<&'static str, Vec<(NaiveDate, f64)>>);

    impl MacroProvider for FakeFred {
        fn name(&self) -> &str {
            "fake"
        }

        fn observations(
            &self,
            series_id: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<(NaiveDate, f64)>, DataError> {
            self.0
                .get(series_id)
                .cloned()
                .ok_or_else(|| DataError::SeriesNotFound {
                    series_id: series_id.to_string(),
                })
        }
    }

    fn config(series: Vec<SeriesSpec>) -> MacroConfig {
        MacroConfig {
            start: d("2024-01-01"),
            end: d("2024-06-30"),
            output: PathBuf::from("unused.csv"),
            series,
            growth: None,
            spread: None,
        }
    }

    fn spec(column: &str, id: &str, policy: ResamplePolicy) -> SeriesSpec {
        SeriesSpec {
            column: column.into(),
            series_id: id.into(),
            policy,
        }
    }

    #[test]
    fn panel_covers_full_range_with_spread() {
        let fred = FakeFred(HashMap::from([
            ("DGS10", vec![(d("2024-01-02"), 4.0), (d("2024-01-03"), 4.2), (d("2024-02-01"), 4.3)]),
            ("DGS2", vec![(d("2024-01-02"), 4.3), (d("2024-03-01"), 4.6)]),
        ]));
        let mut cfg = config(vec![
            spec("treasury_10y", "DGS10", ResamplePolicy::Mean),
            spec("treasury_2y", "DGS2", ResamplePolicy::Mean),
        ]);
        cfg.spread = Some(SpreadSpec {
            column: "yield_curve".into(),
            minuend: "treasury_10y".into(),
            subtrahend: "treasury_2y".into(),
        });

        let panel = fetch_macro_panel(&fred, &cfg).unwrap();
        assert_eq!(panel.dates.len(), 6);
        let curve = panel.column("yield_curve").unwrap();
        assert!((curve[0].unwrap() - (4.1 - 4.3)).abs() < 1e-9);
        // Feb has only a 10y value, Mar only a 2y value.
        assert_eq!(curve[1], None);
        assert_eq!(curve[2], None);
        assert_eq!(panel.column("treasury_10y").unwrap()[5], None);
    }

    #[test]
    fn mean_policy_averages_within_month_before_the_spread() {
        let fred = FakeFred(HashMap::from([
            (
                "DFF",
                vec![(d("2024-01-15"), 5.0), (d("2024-01-28"), 5.2), (d("2024-02-10"), 5.3)],
            ),
            (
                "DGS10",
                vec![(d("2024-01-05"), 3.9), (d("2024-01-31"), 4.0), (d("2024-02-29"), 4.2)],
            ),
        ]));
        let mut cfg = config(vec![
            spec("fed_funds_rate", "DFF", ResamplePolicy::Mean),
            spec("treasury_10y", "DGS10", ResamplePolicy::Last),
        ]);
        cfg.spread = Some(SpreadSpec {
            column: "term_spread".into(),
            minuend: "treasury_10y".into(),
            subtrahend: "fed_funds_rate".into(),
        });

        let panel = fetch_macro_panel(&fred, &cfg).unwrap();
        let ffr = panel.column("fed_funds_rate").unwrap();
        assert!((ffr[0].unwrap() - 5.1).abs() < 1e-9);
        assert!((ffr[1].unwrap() - 5.3).abs() < 1e-9);
        assert_eq!(ffr[2], None);

        let spread = panel.column("term_spread").unwrap();
        assert!((spread[0].unwrap() - (4.0 - 5.1)).abs() < 1e-9);
        assert!((spread[1].unwrap() - (4.2 - 5.3)).abs() < 1e-9);
        assert_eq!(spread[2], None);

        let df = panel.to_frame().unwrap();
        assert_eq!(
            crate::domain::frame::column_names(&df),
            vec!["date", "fed_funds_rate", "treasury_10y", "term_spread"]
        );
        assert_eq!(df.height(), 6);
    }

    #[test]
    fn growth_is_computed_on_levels_then_forward_filled() {
        let fred = FakeFred(HashMap::from([(
            "GDPC1",
            vec![(d("2024-01-01"), 100.0), (d("2024-04-01"), 101.0)],
        )]));
        let mut cfg = config(vec![]);
        cfg.growth = Some(GrowthSpec {
            column: "gdp_growth".into(),
            series_id: "GDPC1".into(),
        });
        let panel = fetch_macro_panel(&fred, &cfg).unwrap();
        let growth = panel.column("gdp_growth").unwrap();
        assert_eq!(growth[0], None);
        assert_eq!(growth[2], None);
        assert!((growth[3].unwrap() - 1.0).abs() < 1e-9);
        // Nothing is carried past the last observation.
        assert_eq!(growth[5], None);
    }

    #[test]
    fn one_failing_series_aborts_the_fetch() {
        let fred = FakeFred(HashMap::from([("UNRATE", vec![(d("2024-01-01"), 3.7)])]));
        let cfg = config(vec![
            spec("unemployment_rate", "UNRATE", ResamplePolicy::Last),
            spec("cpi", "CPIAUCSL", ResamplePolicy::Last),
        ]);
        assert!(matches!(
            fetch_macro_panel(&fred, &cfg),
            Err(DataError::SeriesNotFound { .. })
        ));
    }
}
