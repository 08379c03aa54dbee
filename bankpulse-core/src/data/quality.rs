//! Quality gate run on a frame before anything is written.
//!
//! A `QualityProfile` lists the checks; `check` runs all of them over a
//! polars frame and returns a `QualityReport` carrying every violation, a few
//! offending sample rows, and summary statistics. `QualityReport::into_result`
//! turns a failing report into a `QualityError` that halts the pipeline.

use chrono::{Datelike, Months, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::config::QualityConfig;
use crate::domain::{frame, Metric};

/// Inclusive numeric bounds for one column. `None` leaves that side open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeRule {
    pub column: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RangeRule {
    /// True where the value is numeric and outside the bounds.
    fn outside(&self) -> Expr {
        let x = col(self.column.as_str()).cast(DataType::Float64);
        let below = self.min.map(|m| x.clone().lt(lit(m)));
        let above = self.max.map(|m| x.clone().gt(lit(m)));
        match (below, above) {
            (Some(b), Some(a)) => b.or(a),
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => x.is_null().and(lit(false)),
        }
    }
}

fn describe_range(min: Option<f64>, max: Option<f64>) -> String {
    let lo = min.map_or("-inf".to_string(), |m| m.to_string());
    let hi = max.map_or("+inf".to_string(), |m| m.to_string());
    format!("[{lo}, {hi}]")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub name: String,
    pub required: Vec<String>,
    pub non_null: Vec<String>,
    pub ranges: Vec<RangeRule>,
    /// Columns whose combined values must be unique.
    pub unique_key: Vec<String>,
    /// Date column that must be a gap-free month-start sequence.
    pub contiguous_monthly: Option<String>,
    /// Columns shown alongside the offending column in samples.
    pub sample_columns: Vec<String>,
    pub sample_size: usize,
    /// Column counted for distinct entities in the summary.
    pub entity_column: Option<String>,
    /// Columns summarised with min/max/median.
    pub stats_columns: Vec<String>,
}

impl QualityProfile {
    /// Gate for the institution artifact.
    pub fn institutions(config: &QualityConfig) -> Self {
        let required: Vec<String> = ["report_date", "cert_number", "bank_name"]
            .into_iter()
            .map(String::from)
            .chain(
                Metric::ALL
                    .iter()
                    .filter(|m| **m != Metric::NonperformingLoans)
                    .map(|m| m.column().to_string()),
            )
            .collect();
        Self {
            name: "institutions".into(),
            required,
            non_null: strings(&[
                "report_date",
                "cert_number",
                "bank_name",
                "net_interest_margin",
                "net_income",
                "tier1_capital_ratio",
            ]),
            ranges: vec![
                RangeRule {
                    column: "cert_number".into(),
                    min: Some(1.0),
                    max: None,
                },
                RangeRule {
                    column: "net_interest_margin".into(),
                    min: Some(config.nim_min),
                    max: Some(config.nim_max),
                },
            ],
            unique_key: strings(&["cert_number", "report_date"]),
            contiguous_monthly: None,
            sample_columns: strings(&["report_date", "cert_number"]),
            sample_size: config.sample_size,
            entity_column: Some("cert_number".into()),
            stats_columns: strings(&["net_interest_margin"]),
        }
    }

    /// Gate for the macro artifact.
    pub fn macro_panel(config: &QualityConfig) -> Self {
        Self {
            name: "macro".into(),
            required: strings(&["date"]),
            non_null: strings(&["date"]),
            ranges: Vec::new(),
            unique_key: strings(&["date"]),
            contiguous_monthly: Some("date".into()),
            sample_columns: strings(&["date"]),
            sample_size: config.sample_size,
            entity_column: None,
            stats_columns: Vec::new(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ViolationKind {
    MissingColumn,
    Null,
    NonNumeric,
    OutOfRange { min: Option<f64>, max: Option<f64> },
    DuplicateKey,
    NonContiguous,
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub column: String,
    pub kind: ViolationKind,
    /// Number of offending rows (1 for a missing column).
    pub count: usize,
    /// Up to `sample_size` offending rows.
    pub sample: DataFrame,
}

impl Violation {
    pub fn message(&self) -> String {
        match &self.kind {
            ViolationKind::MissingColumn => format!("missing required column '{}'", self.column),
            ViolationKind::Null => format!("column '{}' has {} null rows", self.column, self.count),
            ViolationKind::NonNumeric => format!(
                "column '{}' contains {} non-numeric values",
                self.column, self.count
            ),
            ViolationKind::OutOfRange { min, max } => format!(
                "column '{}' has {} values outside {}",
                self.column,
                self.count,
                describe_range(*min, *max)
            ),
            ViolationKind::DuplicateKey => format!(
                "key ({}) repeats on {} rows",
                self.column, self.count
            ),
            ViolationKind::NonContiguous => format!(
                "column '{}' is not a contiguous monthly sequence ({} breaks)",
                self.column, self.count
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: String,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub rows: usize,
    pub entities: Option<usize>,
    pub columns: Vec<ColumnStats>,
}

#[derive(Debug, Clone)]
pub struct QualityReport {
    pub profile: String,
    pub violations: Vec<Violation>,
    pub stats: SummaryStats,
}

#[derive(Debug, thiserror::Error)]
#[error("quality gate '{profile}' failed:\n{diagnostic}")]
pub struct QualityError {
    pub profile: String,
    pub diagnostic: String,
    pub report: Box<QualityReport>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable summary: violations with samples, or statistics on success.
    pub fn diagnostic(&self) -> String {
        let mut out = String::new();
        if self.passed() {
            let _ = writeln!(out, "{} quality checks passed", self.profile);
            let _ = writeln!(out, "  rows: {}", self.stats.rows);
            if let Some(n) = self.stats.entities {
                let _ = writeln!(out, "  entities: {n}");
            }
            for c in &self.stats.columns {
                let _ = writeln!(
                    out,
                    "  {} range: {:.4} to {:.4} (median {:.4})",
                    c.column, c.min, c.max, c.median
                );
            }
            return out;
        }
        for v in &self.violations {
            let _ = writeln!(out, "  - {}", v.message());
            if v.sample.height() > 0 {
                let _ = writeln!(out, "{}", v.sample);
            }
        }
        out
    }

    pub fn into_result(self) -> Result<QualityReport, QualityError> {
        if self.passed() {
            Ok(self)
        } else {
            Err(QualityError {
                profile: self.profile.clone(),
                diagnostic: self.diagnostic(),
                report: Box::new(self),
            })
        }
    }
}

/// Evaluate a boolean expression row-wise.
fn mask(df: &DataFrame, expr: Expr) -> PolarsResult<BooleanChunked> {
    let out = df.clone().lazy().select([expr.alias("mask")]).collect()?;
    Ok(out.column("mask")?.bool()?.clone())
}

/// Offending rows of `column`, or `None` when the mask is all false.
fn violation(
    df: &DataFrame,
    profile: &QualityProfile,
    column: &str,
    kind: ViolationKind,
    hits: &BooleanChunked,
) -> PolarsResult<Option<Violation>> {
    let offending = df.filter(hits)?;
    if offending.height() == 0 {
        return Ok(None);
    }
    let mut names: Vec<&str> = profile
        .sample_columns
        .iter()
        .map(String::as_str)
        .filter(|c| frame::has_column(df, c) && *c != column)
        .collect();
    if frame::has_column(df, column) {
        names.push(column);
    }
    Ok(Some(Violation {
        column: column.to_string(),
        kind,
        count: offending.height(),
        sample: offending.select(names)?.head(Some(profile.sample_size)),
    }))
}

/// Rows that break the month-start sequence, including non-null values that
/// are not dates.
fn contiguity_breaks(column: &Column) -> PolarsResult<BooleanChunked> {
    let present: Vec<bool> = column
        .is_not_null()
        .into_iter()
        .map(|p| p.unwrap_or(false))
        .collect();
    let dates = frame::dates(column)?;
    let mut prev: Option<NaiveDate> = None;
    let breaks: Vec<bool> = dates
        .into_iter()
        .zip(present)
        .map(|(date, present)| {
            let Some(date) = date else {
                return present;
            };
            let follows = match prev {
                None => true,
                Some(p) => p.checked_add_months(Months::new(1)) == Some(date),
            };
            prev = Some(date);
            date.day() != 1 || !follows
        })
        .collect();
    Ok(BooleanChunked::from_slice("breaks".into(), &breaks))
}

fn column_stats(column: &Column) -> PolarsResult<Option<ColumnStats>> {
    let values = column.cast(&DataType::Float64)?;
    let values = values.f64()?;
    Ok(match (values.min(), values.max(), values.median()) {
        (Some(min), Some(max), Some(median)) => Some(ColumnStats {
            column: column.name().to_string(),
            min,
            max,
            median,
        }),
        _ => None,
    })
}

/// Run every check in `profile` against `df`.
pub fn check(df: &DataFrame, profile: &QualityProfile) -> PolarsResult<QualityReport> {
    let mut violations = Vec::new();

    for column in &profile.required {
        if !frame::has_column(df, column) {
            violations.push(Violation {
                column: column.clone(),
                kind: ViolationKind::MissingColumn,
                count: 1,
                sample: DataFrame::empty(),
            });
        }
    }

    for column in &profile.non_null {
        if !frame::has_column(df, column) {
            continue;
        }
        let hits = mask(df, col(column.as_str()).is_null())?;
        violations.extend(violation(df, profile, column, ViolationKind::Null, &hits)?);
    }

    for rule in &profile.ranges {
        let Ok(column) = df.column(&rule.column) else {
            continue;
        };
        let numeric = column.dtype().is_integer() || column.dtype().is_float();
        if !numeric {
            let c = col(rule.column.as_str());
            let hits = mask(
                df,
                c.clone()
                    .is_not_null()
                    .and(c.cast(DataType::Float64).is_null()),
            )?;
            violations.extend(violation(
                df,
                profile,
                &rule.column,
                ViolationKind::NonNumeric,
                &hits,
            )?);
        }
        let hits = mask(df, rule.outside())?;
        let kind = ViolationKind::OutOfRange {
            min: rule.min,
            max: rule.max,
        };
        violations.extend(violation(df, profile, &rule.column, kind, &hits)?);
    }

    if !profile.unique_key.is_empty()
        && profile.unique_key.iter().all(|c| frame::has_column(df, c))
    {
        let keys: Vec<Expr> = profile.unique_key.iter().map(|c| col(c.as_str())).collect();
        let hits = mask(df, as_struct(keys).is_duplicated())?;
        let key = profile.unique_key.join(", ");
        violations.extend(violation(df, profile, &key, ViolationKind::DuplicateKey, &hits)?);
    }

    if let Some(name) = &profile.contiguous_monthly {
        if let Ok(column) = df.column(name) {
            let hits = contiguity_breaks(column)?;
            violations.extend(violation(df, profile, name, ViolationKind::NonContiguous, &hits)?);
        }
    }

    let entities = match profile.entity_column.as_deref().map(|c| df.column(c)) {
        Some(Ok(column)) => Some(column.as_materialized_series().drop_nulls().n_unique()?),
        _ => None,
    };
    let mut columns = Vec::new();
    for name in &profile.stats_columns {
        if let Ok(column) = df.column(name) {
            columns.extend(column_stats(column)?);
        }
    }

    let report = QualityReport {
        profile: profile.name.clone(),
        violations,
        stats: SummaryStats {
            rows: df.height(),
            entities,
            columns,
        },
    };
    if report.passed() {
        tracing::info!(profile = %report.profile, rows = report.stats.rows, "quality gate passed");
    } else {
        tracing::warn!(
            profile = %report.profile,
            violations = report.violations.len(),
            "quality gate failed"
        );
    }
    Ok(report)
}
