//! Institution-side domain types: logical metrics, filing rows, profiles.

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::frame;
use super::ids::CertNumber;

/// A logical financial metric, independent of the provider field that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TotalAssets,
    TotalDeposits,
    NetLoans,
    NetIncome,
    ReturnOnAssets,
    ReturnOnEquity,
    NetInterestMargin,
    EfficiencyRatio,
    NonperformingLoans,
    Tier1CapitalRatio,
}

impl Metric {
    /// All metrics in output column order.
    pub const ALL: [Metric; 10] = [
        Metric::TotalAssets,
        Metric::TotalDeposits,
        Metric::NetLoans,
        Metric::NetIncome,
        Metric::ReturnOnAssets,
        Metric::ReturnOnEquity,
        Metric::NetInterestMargin,
        Metric::EfficiencyRatio,
        Metric::NonperformingLoans,
        Metric::Tier1CapitalRatio,
    ];

    /// Canonical column name.
    pub fn column(self) -> &'static str {
        match self {
            Metric::TotalAssets => "total_assets",
            Metric::TotalDeposits => "total_deposits",
            Metric::NetLoans => "net_loans",
            Metric::NetIncome => "net_income",
            Metric::ReturnOnAssets => "return_on_assets",
            Metric::ReturnOnEquity => "return_on_equity",
            Metric::NetInterestMargin => "net_interest_margin",
            Metric::EfficiencyRatio => "efficiency_ratio",
            Metric::NonperformingLoans => "nonperforming_loans",
            Metric::Tier1CapitalRatio => "tier1_capital_ratio",
        }
    }

    /// Provider field names that have carried this metric, highest priority first.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            Metric::TotalAssets => &["ASSET"],
            Metric::TotalDeposits => &["DEP"],
            Metric::NetLoans => &["LNLSNET"],
            Metric::NetIncome => &["NETINC", "PTAXNETINC"],
            Metric::ReturnOnAssets => &["ROA"],
            Metric::ReturnOnEquity => &["ROE"],
            Metric::NetInterestMargin => &["NIMY", "NIM"],
            Metric::EfficiencyRatio => &["EEFFR"],
            Metric::NonperformingLoans => &["NCLNLS"],
            Metric::Tier1CapitalRatio => &["RBC1AAJ", "RBC1RWAJ"],
        }
    }

    pub fn from_column(name: &str) -> Option<Metric> {
        Metric::ALL.into_iter().find(|m| m.column() == name)
    }
}

/// One quarterly filing after candidate resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub report_date: NaiveDate,
    pub metrics: BTreeMap<Metric, Option<f64>>,
}

impl MetricsRow {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(&metric).copied().flatten()
    }
}

/// Institution metadata as returned by the provider's institution search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionProfile {
    pub cert: CertNumber,
    pub name: Option<String>,
    pub city: Option<String>,
    /// Full state name (`STNAME`).
    pub state_name: Option<String>,
    /// Two-letter postal code (`STALP`), when the provider supplies it.
    pub state_code: Option<String>,
    pub total_assets: Option<f64>,
    pub offices: Option<u32>,
    pub last_updated: Option<String>,
    pub active: Option<bool>,
}

impl InstitutionProfile {
    /// Profile for an institution the provider has no metadata for.
    pub fn unknown(cert: CertNumber) -> Self {
        Self {
            cert,
            name: None,
            city: None,
            state_name: None,
            state_code: None,
            total_assets: None,
            offices: None,
            last_updated: None,
            active: None,
        }
    }

    /// Two-letter domicile code: postal code first, then the state name, trimmed
    /// and truncated to two upper-case characters.
    pub fn domicile_code(&self) -> Option<String> {
        let raw = self
            .state_code
            .as_deref()
            .or(self.state_name.as_deref())?
            .trim();
        if raw.is_empty() {
            return None;
        }
        Some(raw.chars().take(2).collect::<String>().to_uppercase())
    }
}

/// A fully resolved institution-quarter, ready for the output artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionRecord {
    pub cert: CertNumber,
    pub report_date: NaiveDate,
    pub bank_name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub active: bool,
    pub metrics: BTreeMap<Metric, Option<f64>>,
}

impl InstitutionRecord {
    /// Output artifact column order.
    pub fn columns() -> Vec<&'static str> {
        let mut cols = vec!["report_date"];
        cols.extend(Metric::ALL.iter().map(|m| m.column()));
        cols.extend(["cert_number", "bank_name", "city", "state", "active"]);
        cols
    }

    /// Flatten records into the institution output frame, sorted by
    /// (cert_number, report_date).
    pub fn to_frame(records: &[InstitutionRecord]) -> PolarsResult<DataFrame> {
        let mut sorted: Vec<&InstitutionRecord> = records.iter().collect();
        sorted.sort_by_key(|r| (r.cert, r.report_date));

        let mut columns = vec![frame::date_column(
            "report_date",
            sorted.iter().map(|r| Some(r.report_date)),
        )?];
        for metric in Metric::ALL {
            let values: Vec<Option<f64>> = sorted
                .iter()
                .map(|r| r.metrics.get(&metric).copied().flatten())
                .collect();
            columns.push(Column::new(metric.column().into(), values));
        }
        let certs: Vec<i64> = sorted.iter().map(|r| i64::from(r.cert.get())).collect();
        let names: Vec<&str> = sorted.iter().map(|r| r.bank_name.as_str()).collect();
        let cities: Vec<Option<&str>> = sorted.iter().map(|r| r.city.as_deref()).collect();
        let states: Vec<Option<&str>> = sorted.iter().map(|r| r.state.as_deref()).collect();
        let active: Vec<bool> = sorted.iter().map(|r| r.active).collect();
        columns.extend([
            Column::new("cert_number".into(), certs),
            Column::new("bank_name".into(), names),
            Column::new("city".into(), cities),
            Column::new("state".into(), states),
            Column::new("active".into(), active),
        ]);
        DataFrame::new(columns)
    }
}
