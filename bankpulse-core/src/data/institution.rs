//! Institution metrics: candidate resolution, profiles, cohort ingestion.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::NaiveDate;
use polars::prelude::*;
use serde_json::Value as Json;

use super::canonicalize::Canonicalizer;
use super::provider::{DataError, FetchProgress, InstitutionProvider, InstitutionQuery, RawRecord};
use crate::config::InstitutionConfig;
use crate::domain::{frame, CertNumber, InstitutionProfile, InstitutionRecord, Metric, MetricsRow};

/// Numeric view of a provider field. Accepts JSON numbers and numeric strings.
pub fn field_f64(record: &RawRecord, key: &str) -> Option<f64> {
    let value = match record.get(key)? {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn field_str<'a>(record: &'a RawRecord, key: &str) -> Option<&'a str> {
    match record.get(key)? {
        Json::String(s) => Some(s.trim()).filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn field_bool(record: &RawRecord, key: &str) -> Option<bool> {
    match record.get(key)? {
        Json::Bool(b) => Some(*b),
        Json::Number(n) => n.as_i64().map(|i| i != 0),
        Json::String(s) => match s.trim() {
            "1" | "true" | "True" => Some(true),
            "0" | "false" | "False" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Report date from `REPDTE`, as `YYYYMMDD` or `YYYY-MM-DD` (string or number).
pub fn parse_report_date(value: &Json) -> Option<NaiveDate> {
    let text = match value {
        Json::String(s) => s.trim().to_string(),
        Json::Number(n) => n.as_u64()?.to_string(),
        _ => return None,
    };
    let head = text.get(..10).unwrap_or(text.as_str());
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&text, "%Y%m%d"))
        .ok()
}

/// Value of `metric` in one record: first candidate field present wins.
pub fn resolve_metric(record: &RawRecord, metric: Metric) -> Option<f64> {
    metric
        .candidates()
        .iter()
        .find_map(|field| field_f64(record, field))
}

/// Resolve every logical metric for one filing record.
pub fn resolve_metrics(record: &RawRecord) -> Result<MetricsRow, DataError> {
    let raw_date = record
        .get("REPDTE")
        .ok_or_else(|| DataError::ResponseFormatChanged("filing record without REPDTE".into()))?;
    let report_date = parse_report_date(raw_date).ok_or_else(|| {
        DataError::ResponseFormatChanged(format!("unparseable REPDTE {raw_date}"))
    })?;
    let metrics = Metric::ALL
        .iter()
        .map(|m| (*m, resolve_metric(record, *m)))
        .collect();
    Ok(MetricsRow {
        report_date,
        metrics,
    })
}

/// Quarterly metrics for one institution within `[start, end]`, ascending.
pub fn fetch_metrics(
    provider: &dyn InstitutionProvider,
    cert: CertNumber,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<MetricsRow>, DataError> {
    let records = provider.financials(cert, start, end)?;
    let mut rows = records
        .iter()
        .map(resolve_metrics)
        .collect::<Result<Vec<_>, _>>()?;
    rows.retain(|r| r.report_date >= start && r.report_date <= end);
    rows.sort_by_key(|r| r.report_date);
    Ok(rows)
}

/// Parse an institution metadata record.
pub fn parse_profile(record: &RawRecord) -> Result<InstitutionProfile, DataError> {
    let cert = field_f64(record, "CERT")
        .filter(|c| *c >= 1.0 && c.fract() == 0.0 && *c <= f64::from(u32::MAX))
        .map(|c| CertNumber(c as u32))
        .ok_or_else(|| {
            DataError::ResponseFormatChanged("institution record without a valid CERT".into())
        })?;
    Ok(InstitutionProfile {
        cert,
        name: field_str(record, "NAME").map(String::from),
        city: field_str(record, "CITY").map(String::from),
        state_name: field_str(record, "STNAME").map(String::from),
        state_code: field_str(record, "STALP")
            .or_else(|| field_str(record, "STATE"))
            .map(String::from),
        total_assets: field_f64(record, "ASSET"),
        offices: field_f64(record, "OFFICES").and_then(|o| u32::try_from(o.round() as i64).ok()),
        last_updated: field_str(record, "DATEUPDT").map(String::from),
        active: field_bool(record, "ACTIVE"),
    })
}

/// Institution search, largest office count first.
pub fn search(
    provider: &dyn InstitutionProvider,
    query: &InstitutionQuery,
) -> Result<Vec<InstitutionProfile>, DataError> {
    provider
        .institutions(query)?
        .iter()
        .map(parse_profile)
        .collect()
}

/// Profile lookup by identifier.
pub fn institution(
    provider: &dyn InstitutionProvider,
    cert: CertNumber,
) -> Result<InstitutionProfile, DataError> {
    search(provider, &InstitutionQuery::by_cert(cert))?
        .into_iter()
        .find(|p| p.cert == cert)
        .ok_or(DataError::InstitutionNotFound { cert })
}

/// Profile lookup that falls back to an empty profile when the provider has
/// no metadata for `cert`. Other errors still propagate.
fn profile_or_unknown(
    provider: &dyn InstitutionProvider,
    cert: CertNumber,
) -> Result<InstitutionProfile, DataError> {
    match institution(provider, cert) {
        Err(DataError::InstitutionNotFound { .. }) => {
            tracing::warn!(%cert, "no institution profile, falling back to a generated name");
            Ok(InstitutionProfile::unknown(cert))
        }
        other => other,
    }
}

/// Outcome of a cohort fetch.
#[derive(Debug)]
pub struct CohortOutcome {
    pub records: Vec<InstitutionRecord>,
    pub fetched: Vec<CertNumber>,
    pub skipped: Vec<(CertNumber, String)>,
}

impl CohortOutcome {
    pub fn to_frame(&self) -> Result<DataFrame, DataError> {
        Ok(InstitutionRecord::to_frame(&self.records)?)
    }
}

fn fetch_one(
    provider: &dyn InstitutionProvider,
    canon: &Canonicalizer,
    cert: CertNumber,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<InstitutionRecord>, DataError> {
    let rows = fetch_metrics(provider, cert, start, end)?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let profile = profile_or_unknown(provider, cert)?;
    let bank_name = canon.canonical_name(cert, profile.name.as_deref());
    let state = profile.domicile_code();
    let active = profile.active.unwrap_or(true);

    Ok(rows
        .into_iter()
        .map(|row| InstitutionRecord {
            cert,
            report_date: row.report_date,
            bank_name: bank_name.clone(),
            city: profile.city.clone(),
            state: state.clone(),
            active,
            metrics: row.metrics,
        })
        .collect())
}

/// Fetch every institution in the configured cohort, one at a time.
///
/// Institutions with no filings or a failing request are skipped; the run
/// fails only if nothing at all was fetched.
pub fn fetch_cohort(
    provider: &dyn InstitutionProvider,
    config: &InstitutionConfig,
    canon: &Canonicalizer,
    progress: &dyn FetchProgress,
) -> Result<CohortOutcome, DataError> {
    let total = config.cohort.len();
    let delay = Duration::from_millis(config.request_delay_ms);
    let mut outcome = CohortOutcome {
        records: Vec::new(),
        fetched: Vec::new(),
        skipped: Vec::new(),
    };

    for (i, &cert) in config.cohort.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            std::thread::sleep(delay);
        }
        progress.on_start(cert, i, total);

        let result = fetch_one(provider, canon, cert, config.start, config.end);
        let report = result.as_ref().map(Vec::len).map_err(clone_for_report);
        progress.on_complete(cert, i, total, &report);

        match result {
            Ok(records) if records.is_empty() => {
                outcome.skipped.push((cert, "no filings".into()));
            }
            Ok(records) => {
                outcome.fetched.push(cert);
                outcome.records.extend(records);
            }
            Err(e) => outcome.skipped.push((cert, e.to_string())),
        }
    }

    progress.on_batch_complete(outcome.fetched.len(), outcome.skipped.len(), total);

    if outcome.fetched.is_empty() {
        return Err(DataError::NoInstitutionData);
    }
    Ok(outcome)
}

// DataError is not Clone; progress only needs the message.
fn clone_for_report(e: &DataError) -> DataError {
    DataError::Other(e.to_string())
}

/// Date-indexed comparison of one field across institutions.
///
/// `field` is either a logical metric column (`return_on_assets`, resolved
/// through its candidates) or a raw provider field (`ROA`). Institutions
/// without the field contribute no column.
pub fn compare_metric(
    provider: &dyn InstitutionProvider,
    canon: &Canonicalizer,
    certs: &[CertNumber],
    field: &str,
    start: NaiveDate,
    end: NaiveDate,
    delay: Duration,
) -> Result<DataFrame, DataError> {
    let metric = Metric::from_column(field);
    let mut columns: Vec<(String, BTreeMap<NaiveDate, f64>)> = Vec::new();
    let mut dates = BTreeSet::new();

    for (i, &cert) in certs.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let profile = profile_or_unknown(provider, cert)?;
        let records = provider.financials(cert, start, end)?;
        let mut values = BTreeMap::new();
        for record in &records {
            let Some(date) = record.get("REPDTE").and_then(parse_report_date) else {
                continue;
            };
            if date < start || date > end {
                continue;
            }
            let value = match metric {
                Some(m) => resolve_metric(record, m),
                None => field_f64(record, field),
            };
            if let Some(v) = value {
                values.insert(date, v);
            }
        }
        if values.is_empty() {
            tracing::info!(%cert, field, "field not reported, leaving institution out");
            continue;
        }
        dates.extend(values.keys().copied());

        let mut name = canon.canonical_name(cert, profile.name.as_deref());
        if columns.iter().any(|(n, _)| *n == name) {
            name = format!("{name} ({cert})");
        }
        columns.push((name, values));
    }

    let mut out = vec![frame::date_column("date", dates.iter().copied().map(Some))?];
    for (name, values) in &columns {
        let cells: Vec<Option<f64>> = dates.iter().map(|d| values.get(d).copied()).collect();
        out.push(Column::new(name.as_str().into(), cells));
    }
    Ok(DataFrame::new(out)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NameConfig;
    use crate::data::provider::NoProgress;
    use serde_json::json;
    use std::collections::HashMap;

    fn record(v: Json) -> RawRecord {
        match v {
            Json::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Filings and profiles keyed by CERT; a CERT without a profile is
    /// unknown to the institution search.
    #[derive(Default)]
    struct FakeFdic {
        filings: HashMap<u32, Vec<RawRecord>>,
        profiles: HashMap<u32, RawRecord>,
    }

    impl FakeFdic {
        fn filing(mut self, cert: u32, fields: Json) -> Self {
            self.filings.entry(cert).or_default().push(record(fields));
            self
        }

        fn profile(mut self, cert: u32, fields: Json) -> Self {
            self.profiles.insert(cert, record(fields));
            self
        }
    }

    impl InstitutionProvider for FakeFdic {
        fn name(&self) -> &str {
            "fake-fdic"
        }

        fn financials(
            &self,
            cert: CertNumber,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<RawRecord>, DataError> {
            Ok(self.filings.get(&cert.get()).cloned().unwrap_or_default())
        }

        fn institutions(&self, query: &InstitutionQuery) -> Result<Vec<RawRecord>, DataError> {
            Ok(query
                .cert
                .and_then(|c| self.profiles.get(&c.get()))
                .cloned()
                .into_iter()
                .collect())
        }
    }

    fn canon() -> Canonicalizer {
        Canonicalizer::new(&NameConfig::default()).unwrap()
    }

    #[test]
    fn first_present_candidate_wins() {
        let r = record(json!({"REPDTE": "20240331", "ROA": 1.1, "NIM": "2.9", "NIMY": null}));
        let row = resolve_metrics(&r).unwrap();
        assert_eq!(row.get(Metric::ReturnOnAssets), Some(1.1));
        assert_eq!(row.get(Metric::NetInterestMargin), Some(2.9));
        assert_eq!(row.get(Metric::TotalAssets), None);

        let both = record(json!({"REPDTE": "2024-03-31", "NETINC": 10, "PTAXNETINC": 12}));
        assert_eq!(resolve_metric(&both, Metric::NetIncome), Some(10.0));
    }

    #[test]
    fn report_date_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(parse_report_date(&json!("20240331")), Some(d));
        assert_eq!(parse_report_date(&json!("2024-03-31")), Some(d));
        assert_eq!(parse_report_date(&json!(20240331)), Some(d));
        assert_eq!(parse_report_date(&json!("03/31/2024")), None);
    }

    #[test]
    fn missing_report_date_is_a_format_change() {
        let r = record(json!({"ROA": 1.0}));
        assert!(matches!(
            resolve_metrics(&r),
            Err(DataError::ResponseFormatChanged(_))
        ));
    }

    #[test]
    fn profile_parses_provider_fields() {
        let r = record(json!({
            "CERT": 6560, "NAME": "The Huntington National Bank", "CITY": "Columbus",
            "STNAME": "Ohio", "STALP": "OH", "ASSET": 195000000, "OFFICES": 980,
            "DATEUPDT": "2024-05-01", "ACTIVE": 1
        }));
        let p = parse_profile(&r).unwrap();
        assert_eq!(p.cert, CertNumber(6560));
        assert_eq!(p.offices, Some(980));
        assert_eq!(p.active, Some(true));
        assert_eq!(p.domicile_code().as_deref(), Some("OH"));

        let bad = record(json!({"NAME": "No Cert"}));
        assert!(parse_profile(&bad).is_err());
    }

    #[test]
    fn office_count_must_fit_u32() {
        let offices = |v: Json| parse_profile(&record(json!({"CERT": 628, "OFFICES": v}))).unwrap().offices;
        assert_eq!(offices(json!(4711.6)), Some(4712));
        assert_eq!(offices(json!("12")), Some(12));
        assert_eq!(offices(json!(-3)), None);
        assert_eq!(offices(json!(1e12)), None);
    }

    #[test]
    fn institution_without_profile_keeps_its_filings() {
        let fdic = FakeFdic::default()
            .filing(817, json!({"REPDTE": "20240331", "ROA": 0.8, "NIMY": 3.0}))
            .filing(628, json!({"REPDTE": "20240331", "ROA": 1.1, "NIMY": 2.5}))
            .profile(628, json!({
                "CERT": 628, "NAME": "JPMorgan Chase Bank, National Association",
                "STALP": "OH", "ACTIVE": 1
            }));
        let config = InstitutionConfig {
            start: d(2024, 1, 1),
            end: d(2024, 12, 31),
            request_delay_ms: 0,
            cohort: vec![CertNumber(817), CertNumber(628)],
            ..InstitutionConfig::default()
        };

        let outcome = fetch_cohort(&fdic, &config, &canon(), &NoProgress).unwrap();
        assert_eq!(outcome.fetched, vec![CertNumber(817), CertNumber(628)]);
        assert!(outcome.skipped.is_empty());

        let unknown = outcome.records.iter().find(|r| r.cert == CertNumber(817)).unwrap();
        assert_eq!(unknown.bank_name, "Bank 817");
        assert_eq!(unknown.state, None);
        assert!(unknown.active);
        assert_eq!(unknown.metrics[&Metric::ReturnOnAssets], Some(0.8));

        let known = outcome.records.iter().find(|r| r.cert == CertNumber(628)).unwrap();
        assert_eq!(known.bank_name, "JPMorgan Chase");
        assert_eq!(known.state.as_deref(), Some("OH"));
        assert_eq!(outcome.to_frame().unwrap().height(), 2);
    }

    #[test]
    fn compare_falls_back_across_candidates_per_institution() {
        let fdic = FakeFdic::default()
            .filing(628, json!({"REPDTE": "20240331", "NIMY": 2.5, "NIM": 9.9}))
            .filing(628, json!({"REPDTE": "20231231", "NIMY": 2.6}))
            .filing(628, json!({"REPDTE": "20220331", "NIMY": 2.0}))
            .filing(817, json!({"REPDTE": "20240331", "NIMY": null, "NIM": 3.1}))
            .profile(628, json!({"CERT": 628, "NAME": "JPMorgan Chase Bank"}));

        let df = compare_metric(
            &fdic,
            &canon(),
            &[CertNumber(628), CertNumber(817)],
            "net_interest_margin",
            d(2023, 1, 1),
            d(2024, 12, 31),
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(frame::column_names(&df), vec!["date", "JPMorgan Chase", "Bank 817"]);
        assert_eq!(
            frame::dates(df.column("date").unwrap()).unwrap(),
            vec![Some(d(2023, 12, 31)), Some(d(2024, 3, 31))]
        );
        assert_eq!(
            frame::floats(df.column("JPMorgan Chase").unwrap()).unwrap(),
            vec![Some(2.6), Some(2.5)]
        );
        assert_eq!(
            frame::floats(df.column("Bank 817").unwrap()).unwrap(),
            vec![None, Some(3.1)]
        );
    }

    #[test]
    fn compare_accepts_raw_provider_fields() {
        let fdic = FakeFdic::default()
            .filing(628, json!({"REPDTE": "20240331", "NIM": 3.3}))
            .filing(3510, json!({"REPDTE": "20240331", "NIMY": 2.9}));

        let df = compare_metric(
            &fdic,
            &canon(),
            &[CertNumber(628), CertNumber(3510)],
            "NIM",
            d(2024, 1, 1),
            d(2024, 12, 31),
            Duration::ZERO,
        )
        .unwrap();
        // 3510 never reports NIM itself, so it contributes no column
        assert_eq!(frame::column_names(&df), vec!["date", "JPMorgan Chase"]);
    }
}
