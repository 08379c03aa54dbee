//! Output artifacts: CSV files with a metadata sidecar, optional Parquet
//! snapshots, and timestamped export directories.
//!
//! Every file is written to `<name>.tmp` first and renamed into place, so a
//! reader never observes a half-written artifact.

use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::{frame, DatasetHash};

/// Columns that carry the date span recorded in the sidecar, in lookup order.
const DATE_COLUMNS: [&str; 2] = ["date", "report_date"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dataframe error: {0}")]
    Frame(#[from] PolarsError),

    #[error("sidecar error: {0}")]
    Sidecar(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Metadata sidecar written next to every CSV artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub file: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub date_column: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub content_hash: DatasetHash,
    pub config_fingerprint: Option<String>,
    pub written_at: DateTime<Utc>,
}

impl ArtifactMeta {
    fn describe(
        df: &DataFrame,
        path: &Path,
        bytes: &[u8],
        fingerprint: Option<&str>,
    ) -> Result<Self, ExportError> {
        let date_column = DATE_COLUMNS
            .iter()
            .find(|c| frame::has_column(df, c))
            .map(|c| c.to_string());
        let dates: Vec<NaiveDate> = match date_column.as_deref() {
            Some(c) => frame::dates(df.column(c)?)?.into_iter().flatten().collect(),
            None => Vec::new(),
        };

        Ok(Self {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            rows: df.height(),
            columns: frame::column_names(df),
            date_column,
            start_date: dates.iter().min().copied(),
            end_date: dates.iter().max().copied(),
            content_hash: DatasetHash::from_bytes(bytes),
            config_fingerprint: fingerprint.map(str::to_string),
            written_at: Utc::now(),
        })
    }
}

/// `<file>.meta.json` next to `path`.
pub fn meta_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".meta.json");
    path.with_file_name(name)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `path` through a temp file and rename.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ExportError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Serialize a frame as CSV with a header row. Nulls become empty fields,
/// dates are `YYYY-MM-DD`.
pub fn encode_csv(df: &DataFrame) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(true)
        .with_date_format(Some("%Y-%m-%d".into()))
        .finish(&mut df.clone())?;
    Ok(buf)
}

/// Write `df` to `path` as CSV plus its sidecar. Returns the sidecar.
pub fn write_csv(
    df: &DataFrame,
    path: &Path,
    config_fingerprint: Option<&str>,
) -> Result<ArtifactMeta, ExportError> {
    let bytes = encode_csv(df)?;
    atomic_write(path, &bytes)?;

    let meta = ArtifactMeta::describe(df, path, &bytes, config_fingerprint)?;
    atomic_write(&meta_path(path), &serde_json::to_vec_pretty(&meta)?)?;

    tracing::info!(
        path = %path.display(),
        rows = meta.rows,
        hash = %meta.content_hash,
        "artifact written"
    );
    Ok(meta)
}

/// Read a CSV artifact. Column types are inferred from the whole file, then
/// every column named in `dtypes` is cast to its declared type.
pub fn read_csv(path: &Path, dtypes: Option<&Schema>) -> Result<DataFrame, ExportError> {
    fs::metadata(path).map_err(io_err(path))?;
    let mut lf = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_try_parse_dates(true)
        .finish()?;
    if let Some(dtypes) = dtypes {
        let present = lf.collect_schema()?;
        let casts: Vec<Expr> = dtypes
            .iter()
            .filter(|(name, _)| present.contains(name.as_str()))
            .map(|(name, dtype)| col(name.clone()).strict_cast(dtype.clone()))
            .collect();
        lf = lf.with_columns(casts);
    }
    Ok(lf.collect()?)
}

pub fn read_meta(path: &Path) -> Result<ArtifactMeta, ExportError> {
    let sidecar = meta_path(path);
    let bytes = fs::read(&sidecar).map_err(io_err(&sidecar))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Whether the file on disk still hashes to what its sidecar recorded.
pub fn verify(path: &Path) -> Result<bool, ExportError> {
    let meta = read_meta(path)?;
    let bytes = fs::read(path).map_err(io_err(path))?;
    Ok(DatasetHash::from_bytes(&bytes) == meta.content_hash)
}

/// Parquet snapshot of `df`.
pub fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let tmp = tmp_path(path);
    let file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    ParquetWriter::new(file).finish(&mut df.clone())?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ExportError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    tracing::debug!(path = %path.display(), rows = df.height(), "parquet snapshot written");
    Ok(())
}

/// Create `base/export_<YYYYMMDD_HHMMSS>` and return it.
pub fn export_dir(base: &Path, at: DateTime<Utc>) -> Result<PathBuf, ExportError> {
    let dir = base.join(format!("export_{}", at.format("%Y%m%d_%H%M%S")));
    fs::create_dir_all(&dir).map_err(io_err(&dir))?;
    Ok(dir)
}
