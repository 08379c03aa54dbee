//! Monthly panel: the dense macro table produced by the macro fetcher.

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use super::frame;
use crate::data::schema::SchemaError;

/// One row per month start, one nullable value per indicator.
///
/// `dates` is a contiguous monthly sequence and every column has exactly
/// `dates.len()` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPanel {
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

impl MonthlyPanel {
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates,
            columns: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Add or replace an indicator column.
    pub fn insert(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<(), SchemaError> {
        if values.len() != self.dates.len() {
            return Err(SchemaError::ColumnLength {
                column: name.to_string(),
                expected: self.dates.len(),
                actual: values.len(),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name.to_string(), values)),
        }
        Ok(())
    }

    /// Frame with `date` first, then indicators in insertion order.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(frame::date_column("date", self.dates.iter().copied().map(Some))?);
        for (name, values) in &self.columns {
            columns.push(Column::new(name.as_str().into(), values.as_slice()));
        }
        DataFrame::new(columns)
    }
}
