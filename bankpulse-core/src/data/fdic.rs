//! FDIC BankFind client.
//!
//! Both endpoints wrap every record as `{"data": {...}}`; the client unwraps
//! them into plain `RawRecord`s before anything else sees them.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;

use super::http::{build_client, get_json};
use super::provider::{DataError, InstitutionProvider, InstitutionQuery, RawRecord};
use crate::domain::CertNumber;

pub const BASE_URL: &str = "https://banks.data.fdic.gov/api";
const FINANCIALS_LIMIT: u32 = 10_000;
const DEFAULT_SEARCH_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Vec<Wrapped>,
}

#[derive(Debug, Deserialize)]
struct Wrapped {
    data: RawRecord,
}

impl Envelope {
    fn into_records(self) -> Vec<RawRecord> {
        self.data.into_iter().map(|w| w.data).collect()
    }
}

pub struct FdicClient {
    client: Client,
    base_url: String,
}

impl FdicClient {
    pub fn new(timeout: Duration) -> Result<Self, DataError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Vec<RawRecord>, DataError> {
        let url = format!("{}/{endpoint}", self.base_url.trim_end_matches('/'));
        let req = self.client.get(url).query(params);
        let envelope: Envelope = get_json(req, "FDIC")?;
        Ok(envelope.into_records())
    }
}

/// `REPDTE` range filter, in the provider's `YYYYMMDD` form.
fn report_date_filter(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "REPDTE:[{} TO {}]",
        start.format("%Y%m%d"),
        end.format("%Y%m%d")
    )
}

impl InstitutionProvider for FdicClient {
    fn name(&self) -> &str {
        "fdic"
    }

    fn financials(
        &self,
        cert: CertNumber,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, DataError> {
        let params = [
            (
                "filters",
                format!("CERT:{cert} AND {}", report_date_filter(start, end)),
            ),
            ("limit", FINANCIALS_LIMIT.to_string()),
            ("sort_by", "REPDTE".to_string()),
            ("sort_order", "DESC".to_string()),
        ];
        let records = self.get("financials", &params)?;
        tracing::debug!(%cert, records = records.len(), "FDIC financials fetched");
        Ok(records)
    }

    fn institutions(&self, query: &InstitutionQuery) -> Result<Vec<RawRecord>, DataError> {
        let limit = if query.limit == 0 {
            DEFAULT_SEARCH_LIMIT
        } else {
            query.limit
        };
        let mut params = vec![
            ("limit", limit.to_string()),
            ("offset", query.offset.to_string()),
            ("sort_by", "OFFICES".to_string()),
            ("sort_order", "DESC".to_string()),
        ];
        if let Some(filters) = query.filters() {
            params.push(("filters", filters));
        }
        self.get("institutions", &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_unwraps_nested_records() {
        let env: Envelope = serde_json::from_str(
            r#"{"meta":{"total":2},"data":[
                {"data":{"CERT":628,"REPDTE":"20240331","ROA":1.2},"score":0},
                {"data":{"CERT":628,"REPDTE":"20231231","ROA":1.1},"score":0}
            ],"totals":{"count":2}}"#,
        )
        .unwrap();
        let records = env.into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["REPDTE"], "20240331");
    }

    #[test]
    fn empty_payload_has_no_records() {
        let env: Envelope = serde_json::from_str(r#"{"meta":{"total":0}}"#).unwrap();
        assert!(env.into_records().is_empty());
    }

    #[test]
    fn date_filter_uses_compact_dates() {
        let f = report_date_filter(
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        );
        assert_eq!(f, "REPDTE:[20000101 TO 20251231]");
    }
}
