//! Provider traits and structured error types.
//!
//! `MacroProvider` and `InstitutionProvider` abstract over the two upstream
//! services so the pipeline can run against the live HTTP clients or against
//! in-memory fakes in tests.

use chrono::NaiveDate;
use polars::prelude::PolarsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::resample::ResampleError;
use super::schema::SchemaError;
use crate::domain::CertNumber;

/// One raw provider record (FDIC `data` object) keyed by provider field name.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Structured error types for provider operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("series not found: {series_id}")]
    SeriesNotFound { series_id: String },

    #[error("institution not found: CERT {cert}")]
    InstitutionNotFound { cert: CertNumber },

    #[error("no institution in the cohort returned any filings")]
    NoInstitutionData,

    #[error("HTTP {status} from {provider}: {detail}")]
    Http {
        provider: String,
        status: u16,
        detail: String,
    },

    #[error(transparent)]
    Resample(#[from] ResampleError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("dataframe error: {0}")]
    Frame(#[from] PolarsError),

    #[error("data error: {0}")]
    Other(String),
}

/// Source of macro time series (FRED in production).
pub trait MacroProvider {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Raw observations for one series over `[start, end]`, missing values
    /// already removed, in provider order.
    fn observations(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, DataError>;
}

/// Institution search filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstitutionQuery {
    pub name: Option<String>,
    pub city: Option<String>,
    /// Two-letter postal code or full state name.
    pub state: Option<String>,
    pub cert: Option<CertNumber>,
    pub limit: u32,
    pub offset: u32,
}

impl InstitutionQuery {
    pub fn by_cert(cert: CertNumber) -> Self {
        Self {
            cert: Some(cert),
            limit: 1,
            ..Self::default()
        }
    }

    /// Provider filter expression, `None` when no filter is set.
    pub fn filters(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(cert) = self.cert {
            parts.push(format!("CERT:{cert}"));
        }
        if let Some(name) = self.name.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(format!("NAME:\"{}\"", name.trim()));
        }
        if let Some(city) = self.city.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(format!("CITY:\"{}\"", city.trim()));
        }
        if let Some(state) = self.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            if state.len() == 2 {
                parts.push(format!("STALP:{}", state.to_uppercase()));
            } else {
                parts.push(format!("STNAME:\"{state}\""));
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" AND "))
        }
    }
}

/// Source of per-institution regulatory filings (FDIC BankFind in production).
pub trait InstitutionProvider {
    fn name(&self) -> &str;

    /// Quarterly filing records for one institution, newest first.
    fn financials(
        &self,
        cert: CertNumber,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, DataError>;

    /// Institution metadata records matching `query`, largest office count first.
    fn institutions(&self, query: &InstitutionQuery) -> Result<Vec<RawRecord>, DataError>;
}

/// Progress callback for multi-institution operations.
pub trait FetchProgress {
    /// Called when starting to fetch an institution.
    fn on_start(&self, cert: CertNumber, index: usize, total: usize);

    /// Called when an institution fetch completes. `Ok` carries the row count.
    fn on_complete(
        &self,
        cert: CertNumber,
        index: usize,
        total: usize,
        result: &Result<usize, DataError>,
    );

    /// Called when the whole cohort is done.
    fn on_batch_complete(&self, succeeded: usize, skipped: usize, total: usize);
}

/// Progress reporter that logs through `tracing`.
pub struct TracingProgress;

impl FetchProgress for TracingProgress {
    fn on_start(&self, cert: CertNumber, index: usize, total: usize) {
        tracing::info!("[{}/{}] fetching CERT {cert}", index + 1, total);
    }

    fn on_complete(
        &self,
        cert: CertNumber,
        _index: usize,
        _total: usize,
        result: &Result<usize, DataError>,
    ) {
        match result {
            Ok(0) => tracing::info!(%cert, "no filings returned, skipping"),
            Ok(rows) => tracing::info!(%cert, rows, "fetched"),
            Err(e) => tracing::warn!(%cert, error = %e, "fetch failed, skipping"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, skipped: usize, total: usize) {
        tracing::info!("cohort complete: {succeeded}/{total} institutions, {skipped} skipped");
    }
}

/// Silent progress reporter.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _cert: CertNumber, _index: usize, _total: usize) {}

    fn on_complete(
        &self,
        _cert: CertNumber,
        _index: usize,
        _total: usize,
        _result: &Result<usize, DataError>,
    ) {
    }

    fn on_batch_complete(&self, _succeeded: usize, _skipped: usize, _total: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_has_no_filter() {
        assert_eq!(InstitutionQuery::default().filters(), None);
    }

    #[test]
    fn query_filters_join_with_and() {
        let q = InstitutionQuery {
            name: Some("Huntington".into()),
            state: Some("oh".into()),
            ..InstitutionQuery::default()
        };
        assert_eq!(
            q.filters().as_deref(),
            Some("NAME:\"Huntington\" AND STALP:OH")
        );

        let q = InstitutionQuery {
            state: Some("New York".into()),
            ..InstitutionQuery::default()
        };
        assert_eq!(q.filters().as_deref(), Some("STNAME:\"New York\""));
        assert_eq!(
            InstitutionQuery::by_cert(CertNumber(628)).filters().as_deref(),
            Some("CERT:628")
        );
    }
}
