//! Monthly alignment of resampled series.
//!
//! Each resampled series covers only its own span; alignment reindexes all
//! of them onto one contiguous month-start axis. Months a series does not
//! cover are null. Nothing is filled here; filling is a resampling policy.

use chrono::NaiveDate;
use std::collections::HashMap;

use crate::data::schema::SchemaError;
use crate::domain::MonthlyPanel;

/// Reindex one resampled series onto `index`.
pub fn reindex(index: &[NaiveDate], series: &[(NaiveDate, Option<f64>)]) -> Vec<Option<f64>> {
    let by_date: HashMap<NaiveDate, Option<f64>> = series.iter().copied().collect();
    index
        .iter()
        .map(|d| by_date.get(d).copied().flatten())
        .collect()
}

/// Align named series onto one monthly panel, keeping input column order.
pub fn align_series(
    index: Vec<NaiveDate>,
    series: Vec<(String, Vec<(NaiveDate, Option<f64>)>)>,
) -> Result<MonthlyPanel, SchemaError> {
    let mut panel = MonthlyPanel::new(index);
    for (name, values) in series {
        let aligned = reindex(&panel.dates, &values);
        panel.insert(&name, aligned)?;
    }
    Ok(panel)
}

/// Element-wise `a - b`; null where either operand is null.
pub fn difference(a: &[Option<f64>], b: &[Option<f64>]) -> Vec<Option<f64>> {
    a.iter()
        .zip(b)
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(x - y),
            _ => None,
        })
        .collect()
}
