//! Calendar-month resampling of irregular time series.
//!
//! Daily, weekly, monthly and quarterly provider series all collapse onto one
//! value per month, labelled by the month's first day. Months inside the span
//! with no observation are null under `last`/`mean`; `ffill` carries the most
//! recent observation at or before each month start and never reaches back
//! before the first observation.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// How a month's observations reduce to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplePolicy {
    Last,
    Mean,
    Ffill,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ResampleError {
    #[error("series not sorted ascending at index {index} ({date})")]
    Unsorted { index: usize, date: NaiveDate },

    #[error("non-finite value at index {index} ({date})")]
    NonFinite { index: usize, date: NaiveDate },
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Month starts `m` with `start <= m <= end`.
pub fn month_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut current = month_start(start);
    if current < start {
        current = match current.checked_add_months(Months::new(1)) {
            Some(d) => d,
            None => return Vec::new(),
        };
    }
    let mut out = Vec::new();
    while current <= end {
        out.push(current);
        match current.checked_add_months(Months::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }
    out
}

/// Drop non-finite values and sort ascending by date (stable, so equal
/// dates keep provider order).
pub fn prepare(series: &[(NaiveDate, f64)]) -> Vec<(NaiveDate, f64)> {
    let mut out: Vec<(NaiveDate, f64)> = series
        .iter()
        .copied()
        .filter(|(_, v)| v.is_finite())
        .collect();
    out.sort_by_key(|(d, _)| *d);
    out
}

/// Period-over-period growth in percent. The first observation has no
/// predecessor and is dropped, as is any step from a zero level.
pub fn pct_change(series: &[(NaiveDate, f64)]) -> Vec<(NaiveDate, f64)> {
    series
        .windows(2)
        .filter_map(|w| {
            let (_, prev) = w[0];
            let (date, cur) = w[1];
            let growth = (cur / prev - 1.0) * 100.0;
            growth.is_finite().then_some((date, growth))
        })
        .collect()
}

fn validate(series: &[(NaiveDate, f64)]) -> Result<(), ResampleError> {
    for (index, (date, value)) in series.iter().enumerate() {
        if !value.is_finite() {
            return Err(ResampleError::NonFinite { index, date: *date });
        }
        if index > 0 && series[index - 1].0 > *date {
            return Err(ResampleError::Unsorted { index, date: *date });
        }
    }
    Ok(())
}

/// Resample `series` to one value per calendar month over its span.
///
/// The input must be sorted ascending with finite values; run it through
/// [`prepare`] first when the provider does not guarantee that.
pub fn resample(
    series: &[(NaiveDate, f64)],
    policy: ResamplePolicy,
) -> Result<Vec<(NaiveDate, Option<f64>)>, ResampleError> {
    validate(series)?;
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return Ok(Vec::new());
    };
    let months = month_range(month_start(first.0), last.0);

    let out = match policy {
        ResamplePolicy::Ffill => {
            let mut cursor = 0;
            let mut carried = None;
            months
                .into_iter()
                .map(|m| {
                    while cursor < series.len() && series[cursor].0 <= m {
                        carried = Some(series[cursor].1);
                        cursor += 1;
                    }
                    (m, carried)
                })
                .collect()
        }
        ResamplePolicy::Last | ResamplePolicy::Mean => {
            let mut cursor = 0;
            months
                .into_iter()
                .map(|m| {
                    let begin = cursor;
                    while cursor < series.len() && month_start(series[cursor].0) == m {
                        cursor += 1;
                    }
                    let bucket = &series[begin..cursor];
                    let value = match (policy, bucket.last()) {
                        (_, None) => None,
                        (ResamplePolicy::Last, Some((_, v))) => Some(*v),
                        _ => Some(bucket.iter().map(|(_, v)| v).sum::<f64>() / bucket.len() as f64),
                    };
                    (m, value)
                })
                .collect()
        }
    };
    Ok(out)
}
