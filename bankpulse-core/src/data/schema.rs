//! Target schemas for the persistent store and table-shape errors.
//!
//! A `TargetSchema` describes one store table: its natural key, the columns
//! that are overwritten on conflict, the columns written only on insert, the
//! alias map applied to incoming column names, and derived-column fallbacks.

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{frame, Metric};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Column {column} has {actual} values, table has {expected} rows")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Type mismatch in column {column} (row {row}): expected {expected}, got {value:?}")]
    TypeMismatch {
        column: String,
        row: usize,
        expected: ColumnKind,
        value: String,
    },

    #[error("Null key column {column} at row {row}")]
    NullKey { column: String, row: usize },

    #[error("dataframe error: {0}")]
    Frame(#[from] PolarsError),
}

/// Storage kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Date,
    Integer,
    Real,
    Text,
    Boolean,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnKind::Date => "date",
            ColumnKind::Integer => "integer",
            ColumnKind::Real => "real",
            ColumnKind::Text => "text",
            ColumnKind::Boolean => "boolean",
        };
        f.write_str(s)
    }
}

impl ColumnKind {
    pub fn dtype(self) -> DataType {
        match self {
            ColumnKind::Date => DataType::Date,
            ColumnKind::Integer => DataType::Int64,
            ColumnKind::Real => DataType::Float64,
            ColumnKind::Text => DataType::String,
            ColumnKind::Boolean => DataType::Boolean,
        }
    }

    /// Cast a column to this kind. Cells that cannot be represented become
    /// null; nulls stay null.
    ///
    /// Text dates may carry a time part, floats only become integers when
    /// whole, and text booleans accept `true`/`false`/`1`/`0`.
    pub fn cast(self, column: &Column) -> PolarsResult<Column> {
        let name = column.name().clone();
        let dtype = column.dtype();
        match (self, dtype) {
            (ColumnKind::Date, DataType::String) => {
                let parsed = column.str()?.into_iter().map(|s| s.and_then(parse_date));
                frame::date_column(name.as_str(), parsed)
            }
            (ColumnKind::Integer, DataType::Float32 | DataType::Float64) => {
                let whole: Vec<Option<i64>> = frame::floats(column)?
                    .into_iter()
                    .map(|v| v.filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .collect();
                Ok(Column::new(name, whole))
            }
            (ColumnKind::Boolean, DataType::String) => {
                let parsed: Vec<Option<bool>> = column
                    .str()?
                    .into_iter()
                    .map(|s| s.and_then(parse_bool))
                    .collect();
                Ok(Column::new(name, parsed))
            }
            _ => column.cast(&self.dtype()),
        }
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Fallback rule for a column the incoming table does not carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    /// Period-over-period growth of `source` in percent, over key order.
    PctChange { source: String },
    /// `minuend - subtrahend`, null if either operand is null.
    Difference { minuend: String, subtrahend: String },
}

impl Derivation {
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Derivation::PctChange { source } => vec![source.as_str()],
            Derivation::Difference {
                minuend,
                subtrahend,
            } => vec![minuend.as_str(), subtrahend.as_str()],
        }
    }
}

/// What happens to a stored value when the incoming value is null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The incoming row is authoritative, nulls included.
    #[default]
    Overwrite,
    /// Incoming nulls keep the stored value.
    KeepExisting,
}

/// Column that carries a display name canonicalized by an identifier column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityColumns {
    pub id: String,
    pub name: String,
}

/// Description of one store table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSchema {
    pub table: String,
    /// Natural key, in conflict-target order.
    pub key: Vec<String>,
    /// Every column with its kind, in storage order.
    pub columns: Vec<(String, ColumnKind)>,
    /// Columns written on insert and left untouched on conflict.
    pub insert_only: Vec<String>,
    /// Incoming name -> canonical name, applied only when the canonical column is absent.
    pub aliases: Vec<(String, String)>,
    pub derivations: Vec<(String, Derivation)>,
    pub identity: Option<IdentityColumns>,
}

impl TargetSchema {
    pub fn kind(&self, column: &str) -> Option<ColumnKind> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, k)| *k)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.kind(column).is_some()
    }

    pub fn is_key(&self, column: &str) -> bool {
        self.key.iter().any(|k| k == column)
    }

    pub fn is_insert_only(&self, column: &str) -> bool {
        self.insert_only.iter().any(|k| k == column)
    }

    /// Columns overwritten on conflict.
    pub fn value_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|(c, _)| c.as_str())
            .filter(|c| !self.is_key(c) && !self.is_insert_only(c))
            .collect()
    }

    /// Dtypes for reading an artifact of this table: canonical columns plus
    /// every alias that maps onto one.
    pub fn incoming_dtypes(&self) -> Schema {
        let canonical = self
            .columns
            .iter()
            .map(|(c, k)| Field::new(c.as_str().into(), k.dtype()));
        let aliased = self.aliases.iter().filter_map(|(from, to)| {
            self.kind(to)
                .map(|k| Field::new(from.as_str().into(), k.dtype()))
        });
        Schema::from_iter(canonical.chain(aliased))
    }

    /// Key columns joined for `ORDER BY` / `ON CONFLICT`.
    pub fn key_list(&self) -> String {
        self.key.join(", ")
    }

    /// Macro table, keyed by month-start `date`.
    pub fn economic_data() -> Self {
        let reals = [
            "delinq_cc",
            "delinq_mortgage",
            "delinq_consumer",
            "fed_funds_rate",
            "prime_rate",
            "mortgage_30y",
            "treasury_10y",
            "treasury_2y",
            "unemployment_rate",
            "gdp_growth",
            "cpi",
            "housing_starts",
            "personal_income",
            "consumer_sentiment",
            "net_interest_margin",
            "yield_curve",
            "unemployment_lag1",
            "unemployment_lag3",
            "unemployment_lag6",
            "fed_funds_lag1",
            "fed_funds_lag3",
            "fed_funds_lag6",
            "gdp_growth_lag1",
            "gdp_growth_lag3",
            "gdp_growth_lag6",
            "fed_funds_change",
            "unemployment_change",
        ];
        let mut columns = vec![("date".to_string(), ColumnKind::Date)];
        columns.extend(reals.iter().map(|c| (c.to_string(), ColumnKind::Real)));

        let aliases = [
            ("index", "date"),
            ("unemployment", "unemployment_rate"),
            ("yield_spread", "yield_curve"),
            ("fed_funds_rate_lag1", "fed_funds_lag1"),
            ("fed_funds_rate_lag3", "fed_funds_lag3"),
            ("fed_funds_rate_lag6", "fed_funds_lag6"),
            ("fed_funds_rate_delta", "fed_funds_change"),
            ("unemployment_delta", "unemployment_change"),
        ];

        Self {
            table: "economic_data".into(),
            key: vec!["date".into()],
            columns,
            insert_only: Vec::new(),
            aliases: pairs(&aliases),
            derivations: vec![
                (
                    "gdp_growth".into(),
                    Derivation::PctChange {
                        source: "gdp".into(),
                    },
                ),
                (
                    "yield_curve".into(),
                    Derivation::Difference {
                        minuend: "treasury_10y".into(),
                        subtrahend: "treasury_2y".into(),
                    },
                ),
            ],
            identity: None,
        }
    }

    /// Institution-quarter table, keyed by `(cert_number, date)`.
    pub fn bank_performance() -> Self {
        let mut columns = vec![
            ("cert_number".to_string(), ColumnKind::Integer),
            ("date".to_string(), ColumnKind::Date),
            ("bank_name".to_string(), ColumnKind::Text),
            ("city".to_string(), ColumnKind::Text),
            ("state".to_string(), ColumnKind::Text),
            ("active".to_string(), ColumnKind::Boolean),
        ];
        columns.extend(
            Metric::ALL
                .iter()
                .map(|m| (m.column().to_string(), ColumnKind::Real)),
        );
        columns.push(("equity_capital".to_string(), ColumnKind::Real));

        let aliases = [
            ("report_date", "date"),
            ("total_loans", "net_loans"),
            ("roa", "return_on_assets"),
            ("roe", "return_on_equity"),
            ("nim", "net_interest_margin"),
            ("name", "bank_name"),
            ("NAME", "bank_name"),
            ("CITY", "city"),
            ("STALP", "state"),
            ("STATE", "state"),
        ];

        Self {
            table: "bank_performance".into(),
            key: vec!["cert_number".into(), "date".into()],
            columns,
            insert_only: vec![
                "bank_name".into(),
                "city".into(),
                "state".into(),
                "active".into(),
            ],
            aliases: pairs(&aliases),
            derivations: Vec::new(),
            identity: Some(IdentityColumns {
                id: "cert_number".into(),
                name: "bank_name".into(),
            }),
        }
    }
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}
