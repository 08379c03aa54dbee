//! Typed access to polars frames.
//!
//! Dates are stored as `Date` (days since 1970-01-01), the same encoding the
//! Parquet snapshots use.

use chrono::{Duration, NaiveDate};
use polars::prelude::*;

pub fn epoch() -> NaiveDate {
    NaiveDate::default()
}

pub fn date_to_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

pub fn days_to_date(days: i32) -> NaiveDate {
    epoch() + Duration::days(i64::from(days))
}

/// Build a `Date` column from optional dates.
pub fn date_column(
    name: &str,
    dates: impl IntoIterator<Item = Option<NaiveDate>>,
) -> PolarsResult<Column> {
    let days: Vec<Option<i32>> = dates.into_iter().map(|d| d.map(date_to_days)).collect();
    Column::new(name.into(), days).cast(&DataType::Date)
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|n| n.to_string())
        .collect()
}

/// Values of a `Date` (or `Datetime`) column.
pub fn dates(column: &Column) -> PolarsResult<Vec<Option<NaiveDate>>> {
    let days = column.cast(&DataType::Date)?.cast(&DataType::Int32)?;
    Ok(days.i32()?.into_iter().map(|d| d.map(days_to_date)).collect())
}

/// Values of a numeric column as `f64`.
pub fn floats(column: &Column) -> PolarsResult<Vec<Option<f64>>> {
    let cast = column.cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().collect())
}

pub fn ints(column: &Column) -> PolarsResult<Vec<Option<i64>>> {
    let cast = column.cast(&DataType::Int64)?;
    Ok(cast.i64()?.into_iter().collect())
}

pub fn texts(column: &Column) -> PolarsResult<Vec<Option<String>>> {
    let cast = column.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|s| s.map(str::to_string))
        .collect())
}

pub fn bools(column: &Column) -> PolarsResult<Vec<Option<bool>>> {
    let cast = column.cast(&DataType::Boolean)?;
    Ok(cast.bool()?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_columns_keep_calendar_days() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(days_to_date(date_to_days(d)), d);
        assert_eq!(date_to_days(epoch()), 0);

        let col = date_column("date", [Some(d), None]).unwrap();
        assert_eq!(col.dtype(), &DataType::Date);
        assert_eq!(dates(&col).unwrap(), vec![Some(d), None]);
    }

    #[test]
    fn accessors_cast_numeric_columns() {
        let df = df!(
            "cert_number" => [628i64, 817],
            "nim" => [Some(2.5), None],
            "name" => ["JPMorgan Chase", "Bank 817"],
        )
        .unwrap();
        assert!(has_column(&df, "nim"));
        assert!(!has_column(&df, "roa"));
        assert_eq!(column_names(&df), vec!["cert_number", "nim", "name"]);
        assert_eq!(floats(df.column("cert_number").unwrap()).unwrap()[1], Some(817.0));
        assert_eq!(floats(df.column("nim").unwrap()).unwrap(), vec![Some(2.5), None]);
        assert_eq!(ints(df.column("cert_number").unwrap()).unwrap()[0], Some(628));
        assert_eq!(
            texts(df.column("name").unwrap()).unwrap()[1].as_deref(),
            Some("Bank 817")
        );
    }
}
