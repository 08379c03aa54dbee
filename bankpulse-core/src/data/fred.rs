//! FRED (St. Louis Fed) series observations client.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;

use super::http::{build_client, get_json};
use super::provider::{DataError, MacroProvider};

pub const BASE_URL: &str = "https://api.stlouisfed.org/fred/series/observations";
const OBS_LIMIT: u32 = 100_000;

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    date: String,
    value: String,
}

pub struct FredClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl FredClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, DataError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point the client at another host (a local mirror or a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl MacroProvider for FredClient {
    fn name(&self) -> &str {
        "fred"
    }

    fn observations(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, DataError> {
        let start = start.to_string();
        let end = end.to_string();
        let limit = OBS_LIMIT.to_string();
        let req = self.client.get(&self.base_url).query(&[
            ("series_id", series_id),
            ("api_key", self.api_key.as_str()),
            ("file_type", "json"),
            ("observation_start", start.as_str()),
            ("observation_end", end.as_str()),
            ("limit", limit.as_str()),
        ]);

        let body: ObservationsResponse = match get_json(req, "FRED") {
            Ok(body) => body,
            Err(DataError::Http { status: 400, detail, .. }) if detail.contains("does not exist") => {
                return Err(DataError::SeriesNotFound {
                    series_id: series_id.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let obs = parse_observations(body)?;
        tracing::debug!(series_id, observations = obs.len(), "FRED series fetched");
        Ok(obs)
    }
}

fn parse_observations(body: ObservationsResponse) -> Result<Vec<(NaiveDate, f64)>, DataError> {
    let mut out = Vec::with_capacity(body.observations.len());
    for obs in body.observations {
        let Some(value) = parse_value(&obs.value) else {
            continue;
        };
        let date = NaiveDate::parse_from_str(&obs.date, "%Y-%m-%d").map_err(|e| {
            DataError::ResponseFormatChanged(format!("invalid FRED date '{}': {e}", obs.date))
        })?;
        out.push((date, value));
    }
    Ok(out)
}

/// FRED encodes missing observations as `"."`.
fn parse_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "." {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_observations_and_skips_missing_marker() {
        let body: ObservationsResponse = serde_json::from_str(
            r#"{"realtime_start":"2024-01-01","count":3,"observations":[
                {"realtime_start":"2024-01-01","date":"2024-01-01","value":"5.33"},
                {"realtime_start":"2024-01-01","date":"2024-01-02","value":"."},
                {"realtime_start":"2024-01-01","date":"2024-01-03","value":"5.31"}
            ]}"#,
        )
        .unwrap();
        let obs = parse_observations(body).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[1], (NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), 5.31));
    }

    #[test]
    fn bad_date_is_a_format_change() {
        let body = ObservationsResponse {
            observations: vec![Observation {
                date: "01/03/2024".into(),
                value: "1".into(),
            }],
        };
        assert!(matches!(
            parse_observations(body),
            Err(DataError::ResponseFormatChanged(_))
        ));
    }

    #[test]
    fn parse_value_handles_markers() {
        assert_eq!(parse_value("."), None);
        assert_eq!(parse_value(""), None);
        assert_eq!(parse_value(" 3.5 "), Some(3.5));
        assert_eq!(parse_value("abc"), None);
    }
}
