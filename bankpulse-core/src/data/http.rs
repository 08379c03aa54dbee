//! Shared blocking HTTP plumbing for the provider clients.
//!
//! No retries: every failure surfaces as a typed `DataError`.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::provider::DataError;

const USER_AGENT: &str = concat!("bankpulse/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_client(timeout: Duration) -> Result<Client, DataError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))
}

/// Send `req` and decode a JSON body, mapping transport and status failures.
pub(crate) fn get_json<T: DeserializeOwned>(
    req: RequestBuilder,
    provider: &str,
) -> Result<T, DataError> {
    let resp = req.send().map_err(|e| {
        if e.is_connect() || e.is_timeout() {
            DataError::NetworkUnreachable(format!("{provider}: {e}"))
        } else {
            DataError::Other(format!("{provider} request failed: {e}"))
        }
    })?;

    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(DataError::RateLimited {
            retry_after_secs: retry_after,
        });
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(DataError::AuthenticationRequired(format!(
            "{provider} rejected the request (HTTP {status})"
        )));
    }
    if !status.is_success() {
        let detail = resp.text().unwrap_or_default();
        return Err(DataError::Http {
            provider: provider.to_string(),
            status: status.as_u16(),
            detail: detail.chars().take(200).collect(),
        });
    }

    resp.json::<T>().map_err(|e| {
        DataError::ResponseFormatChanged(format!("failed to parse {provider} response: {e}"))
    })
}
