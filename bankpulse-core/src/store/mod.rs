//! Persistent relational store (SQLite).
//!
//! One `Store` is one session: it is opened at the start of a run and dropped
//! at the end. Each `upsert` call is a single transaction, so a failed write
//! leaves no partial state behind.

pub mod reconcile;

use chrono::NaiveDate;
use polars::prelude::*;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data::schema::{ColumnKind, ConflictPolicy, SchemaError, TargetSchema};
use crate::domain::frame;

pub use reconcile::reconcile;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// SQLite's default bound-parameter ceiling.
const MAX_PARAMS: usize = 32_766;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("table {table} has no column {column}")]
    UnknownColumn { table: String, column: String },

    #[error("column {column} has type {dtype}, which the store cannot hold")]
    UnsupportedType { column: String, dtype: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("dataframe error: {0}")]
    Frame(#[from] PolarsError),
}

/// Row counts for one upsert call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub table: String,
    pub rows: usize,
    pub inserted: usize,
    pub updated: usize,
}

/// Bindable SQL values for every cell of `column`. Dates become
/// `YYYY-MM-DD` text, booleans 0/1, non-finite floats null.
fn sql_values(column: &Column) -> Result<Vec<SqlValue>, StoreError> {
    let dtype = column.dtype();
    let values = match dtype {
        DataType::Null => vec![SqlValue::Null; column.len()],
        DataType::Date => frame::dates(column)?
            .into_iter()
            .map(|d| d.map_or(SqlValue::Null, |d| SqlValue::Text(d.format("%Y-%m-%d").to_string())))
            .collect(),
        DataType::Boolean => frame::bools(column)?
            .into_iter()
            .map(|b| b.map_or(SqlValue::Null, |b| SqlValue::Integer(i64::from(b))))
            .collect(),
        DataType::String => frame::texts(column)?
            .into_iter()
            .map(|s| s.map_or(SqlValue::Null, SqlValue::Text))
            .collect(),
        dt if dt.is_integer() => frame::ints(column)?
            .into_iter()
            .map(|i| i.map_or(SqlValue::Null, SqlValue::Integer))
            .collect(),
        dt if dt.is_float() => frame::floats(column)?
            .into_iter()
            .map(|x| match x {
                Some(x) if x.is_finite() => SqlValue::Real(x),
                _ => SqlValue::Null,
            })
            .collect(),
        other => {
            return Err(StoreError::UnsupportedType {
                column: column.name().to_string(),
                dtype: other.to_string(),
            })
        }
    };
    Ok(values)
}

/// Accumulates stored cells of one column as the column's kind.
enum ColumnBuilder {
    Date(Vec<Option<NaiveDate>>),
    Integer(Vec<Option<i64>>),
    Real(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Boolean(Vec<Option<bool>>),
}

impl ColumnBuilder {
    fn new(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Date => Self::Date(Vec::new()),
            ColumnKind::Integer => Self::Integer(Vec::new()),
            ColumnKind::Real => Self::Real(Vec::new()),
            ColumnKind::Text => Self::Text(Vec::new()),
            ColumnKind::Boolean => Self::Boolean(Vec::new()),
        }
    }

    fn push(&mut self, raw: ValueRef<'_>) {
        match self {
            Self::Date(v) => v.push(match raw {
                ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
                _ => None,
            }),
            Self::Integer(v) => v.push(match raw {
                ValueRef::Integer(i) => Some(i),
                ValueRef::Real(x) if x.fract() == 0.0 => Some(x as i64),
                _ => None,
            }),
            Self::Real(v) => v.push(match raw {
                ValueRef::Integer(i) => Some(i as f64),
                ValueRef::Real(x) => Some(x),
                _ => None,
            }),
            Self::Text(v) => v.push(match raw {
                ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                ValueRef::Integer(i) => Some(i.to_string()),
                ValueRef::Real(x) => Some(x.to_string()),
                _ => None,
            }),
            Self::Boolean(v) => v.push(match raw {
                ValueRef::Integer(i) => Some(i != 0),
                _ => None,
            }),
        }
    }

    fn finish(self, name: &str) -> PolarsResult<Column> {
        Ok(match self {
            Self::Date(v) => frame::date_column(name, v)?,
            Self::Integer(v) => Column::new(name.into(), v),
            Self::Real(v) => Column::new(name.into(), v),
            Self::Text(v) => Column::new(name.into(), v),
            Self::Boolean(v) => Column::new(name.into(), v),
        })
    }
}

/// Columns of the joined export: `(select expression, output name, kind)`.
const JOINED_COLUMNS: [(&str, &str, ColumnKind); 20] = [
    ("b.cert_number", "cert_number", ColumnKind::Integer),
    ("b.bank_name", "bank_name", ColumnKind::Text),
    ("b.date", "bank_date", ColumnKind::Date),
    ("b.total_assets", "total_assets", ColumnKind::Real),
    ("b.total_deposits", "total_deposits", ColumnKind::Real),
    ("b.net_loans", "net_loans", ColumnKind::Real),
    ("b.net_income", "net_income", ColumnKind::Real),
    ("b.return_on_assets", "return_on_assets", ColumnKind::Real),
    ("b.return_on_equity", "return_on_equity", ColumnKind::Real),
    ("b.net_interest_margin", "net_interest_margin", ColumnKind::Real),
    ("b.efficiency_ratio", "efficiency_ratio", ColumnKind::Real),
    ("b.tier1_capital_ratio", "tier1_capital_ratio", ColumnKind::Real),
    ("b.active", "active", ColumnKind::Boolean),
    ("e.date", "econ_date", ColumnKind::Date),
    ("e.unemployment_rate", "unemployment_rate", ColumnKind::Real),
    ("e.fed_funds_rate", "fed_funds_rate", ColumnKind::Real),
    ("e.gdp_growth", "gdp_growth", ColumnKind::Real),
    ("e.yield_curve", "yield_curve", ColumnKind::Real),
    ("e.delinq_cc", "delinq_cc", ColumnKind::Real),
    ("e.delinq_mortgage", "delinq_mortgage", ColumnKind::Real),
];

pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn count(&self, schema: &TargetSchema) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", schema.table),
            [],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as usize)
    }

    /// Merge `df` into `schema.table` on the natural key.
    ///
    /// `df` must already be reconciled: every column belongs to the schema
    /// and every key column is present. Value columns follow `policy` on
    /// conflict; insert-only columns keep their stored value.
    pub fn upsert(
        &mut self,
        df: &DataFrame,
        schema: &TargetSchema,
        policy: ConflictPolicy,
        chunk_size: usize,
    ) -> Result<UpsertSummary, StoreError> {
        let columns = frame::column_names(df);
        for column in &columns {
            if !schema.has_column(column) {
                return Err(StoreError::UnknownColumn {
                    table: schema.table.clone(),
                    column: column.clone(),
                });
            }
        }
        for key in &schema.key {
            if !frame::has_column(df, key) {
                return Err(SchemaError::MissingColumn(key.clone()).into());
            }
        }

        let cells = df
            .get_columns()
            .iter()
            .map(sql_values)
            .collect::<Result<Vec<_>, _>>()?;
        let height = df.height();
        let chunk_rows = chunk_size.clamp(1, (MAX_PARAMS / columns.len().max(1)).max(1));
        let before = self.count(schema)?;

        let tx = self.conn.transaction()?;
        for start in (0..height).step_by(chunk_rows) {
            let end = (start + chunk_rows).min(height);
            let sql = upsert_sql(schema, &columns, end - start, policy);
            let mut stmt = tx.prepare_cached(&sql)?;
            let params = (start..end).flat_map(|row| cells.iter().map(move |c| &c[row]));
            stmt.execute(params_from_iter(params))?;
        }
        tx.commit()?;

        let after = self.count(schema)?;
        let inserted = after.saturating_sub(before);
        let summary = UpsertSummary {
            table: schema.table.clone(),
            rows: height,
            inserted,
            updated: height.saturating_sub(inserted),
        };
        tracing::info!(
            table = %summary.table,
            rows = summary.rows,
            inserted = summary.inserted,
            updated = summary.updated,
            "upsert committed"
        );
        Ok(summary)
    }

    /// Every stored row of `schema.table`, ordered by the natural key.
    pub fn load_table(&self, schema: &TargetSchema) -> Result<DataFrame, StoreError> {
        let names: Vec<&str> = schema.columns.iter().map(|(c, _)| c.as_str()).collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            names.join(", "),
            schema.table,
            schema.key_list()
        );
        self.query(&sql, &names, |i| schema.columns[i].1)
    }

    /// Active institutions joined with the macro row of the same month.
    pub fn active_with_macro(&self) -> Result<DataFrame, StoreError> {
        let select: Vec<String> = JOINED_COLUMNS
            .iter()
            .map(|(expr, name, _)| format!("{expr} AS {name}"))
            .collect();
        let sql = format!(
            "SELECT {} FROM bank_performance b \
             LEFT JOIN economic_data e ON substr(b.date, 1, 7) = substr(e.date, 1, 7) \
             WHERE b.active = 1 \
             ORDER BY b.date, b.cert_number",
            select.join(", ")
        );
        let names: Vec<&str> = JOINED_COLUMNS.iter().map(|(_, n, _)| *n).collect();
        self.query(&sql, &names, |i| JOINED_COLUMNS[i].2)
    }

    fn query(
        &self,
        sql: &str,
        names: &[&str],
        kind_of: impl Fn(usize) -> ColumnKind,
    ) -> Result<DataFrame, StoreError> {
        let mut builders: Vec<ColumnBuilder> =
            (0..names.len()).map(|i| ColumnBuilder::new(kind_of(i))).collect();
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (i, builder) in builders.iter_mut().enumerate() {
                builder.push(row.get_ref(i)?);
            }
        }

        let columns = names
            .iter()
            .zip(builders)
            .map(|(name, builder)| builder.finish(name))
            .collect::<PolarsResult<Vec<_>>>()?;
        Ok(DataFrame::new(columns)?)
    }
}

/// Multi-row `INSERT ... ON CONFLICT` for `rows` rows of `columns`.
fn upsert_sql(
    schema: &TargetSchema,
    columns: &[String],
    rows: usize,
    policy: ConflictPolicy,
) -> String {
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![placeholders.as_str(); rows].join(", ");

    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !schema.is_key(c) && !schema.is_insert_only(c))
        .map(|c| match policy {
            ConflictPolicy::Overwrite => format!("{c} = excluded.{c}"),
            ConflictPolicy::KeepExisting => {
                format!("{c} = COALESCE(excluded.{c}, {}.{c})", schema.table)
            }
        })
        .collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT({}) {}",
        schema.table,
        columns.join(", "),
        values,
        schema.key_list(),
        action
    )
}
