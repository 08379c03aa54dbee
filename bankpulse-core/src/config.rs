//! Serializable pipeline configuration and credentials.
//!
//! Everything a run needs is an explicit `PipelineConfig` value. Defaults
//! reproduce the stock cohort, series list and date ranges; a TOML file can
//! override any section.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::data::resample::ResamplePolicy;
use crate::data::schema::ConflictPolicy;
use crate::domain::CertNumber;

pub const FRED_API_KEY: &str = "FRED_API_KEY";
const FRED_KEY_PLACEHOLDER: &str = "your_fred_api_key_here";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(String),

    #[error("missing {name}: set it in the environment or in .env")]
    MissingCredential { name: String },

    #[error("{name} still holds the placeholder value; set a real key")]
    PlaceholderCredential { name: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One macro output column and the provider series behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSpec {
    pub column: String,
    pub series_id: String,
    pub policy: ResamplePolicy,
}

/// Growth column computed from a level series before resampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthSpec {
    pub column: String,
    pub series_id: String,
}

/// Difference of two aligned columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadSpec {
    pub column: String,
    pub minuend: String,
    pub subtrahend: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub output: PathBuf,
    pub series: Vec<SeriesSpec>,
    pub growth: Option<GrowthSpec>,
    pub spread: Option<SpreadSpec>,
}

impl Default for MacroConfig {
    fn default() -> Self {
        use ResamplePolicy::{Ffill, Last, Mean};
        let series = [
            ("delinq_cc", "DRCCLACBS", Ffill),
            ("delinq_mortgage", "DRSFRMACBS", Ffill),
            ("delinq_consumer", "DRCLACBS", Ffill),
            ("fed_funds_rate", "DFF", Mean),
            ("prime_rate", "DPRIME", Mean),
            ("mortgage_30y", "MORTGAGE30US", Mean),
            ("treasury_10y", "DGS10", Mean),
            ("treasury_2y", "DGS2", Mean),
            ("unemployment_rate", "UNRATE", Last),
            ("cpi", "CPIAUCSL", Last),
            ("consumer_sentiment", "UMCSENT", Last),
        ]
        .into_iter()
        .map(|(column, series_id, policy)| SeriesSpec {
            column: column.into(),
            series_id: series_id.into(),
            policy,
        })
        .collect();

        Self {
            start: ymd(2000, 7, 1),
            end: ymd(2025, 12, 31),
            output: PathBuf::from("data/fred_data.csv"),
            series,
            growth: Some(GrowthSpec {
                column: "gdp_growth".into(),
                series_id: "GDPC1".into(),
            }),
            spread: Some(SpreadSpec {
                column: "yield_curve".into(),
                minuend: "treasury_10y".into(),
                subtrahend: "treasury_2y".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstitutionConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub output: PathBuf,
    /// Minimum pause between consecutive institution requests.
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
    pub cohort: Vec<CertNumber>,
}

impl Default for InstitutionConfig {
    fn default() -> Self {
        Self {
            start: ymd(2000, 1, 1),
            end: ymd(2025, 12, 31),
            output: PathBuf::from("data/bank_data.csv"),
            request_delay_ms: 100,
            timeout_secs: 30,
            cohort: [628, 3510, 3511, 7213, 6548, 33124, 18409, 4297, 6560]
                .into_iter()
                .map(CertNumber)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Rows per prepared-statement batch inside the single transaction.
    pub chunk_size: usize,
    pub conflict_policy: ConflictPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/bankpulse.db"),
            chunk_size: 100,
            conflict_policy: ConflictPolicy::Overwrite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub nim_min: f64,
    pub nim_max: f64,
    pub sample_size: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            nim_min: -5.0,
            nim_max: 20.0,
            sample_size: 5,
        }
    }
}

/// Fixed display name for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameOverride {
    pub cert: CertNumber,
    pub name: String,
}

/// Identity tables for bank display names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameConfig {
    /// Always wins over the source name.
    pub overrides: Vec<NameOverride>,
    /// Lower-cased cleaned name -> display name.
    pub aliases: BTreeMap<String, String>,
}

impl Default for NameConfig {
    fn default() -> Self {
        let overrides = [
            (628, "JPMorgan Chase"),
            (3510, "Bank of America"),
            (3511, "Wells Fargo"),
            (7213, "Citibank"),
            (6548, "U.S. Bank"),
            (33124, "Goldman Sachs Bank"),
            (18409, "TD Bank"),
            (4297, "Capital One"),
            (6560, "Huntington National Bank"),
        ]
        .into_iter()
        .map(|(cert, name)| NameOverride {
            cert: CertNumber(cert),
            name: name.to_string(),
        })
        .collect();

        let aliases = [
            "the huntington national bank",
            "huntington",
            "huntington national bank",
        ]
        .into_iter()
        .map(|k| (k.to_string(), "Huntington National Bank".to_string()))
        .collect();

        Self { overrides, aliases }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Parent of the timestamped store-export directories.
    pub dir: PathBuf,
    /// Also write a Parquet snapshot next to every CSV artifact.
    pub parquet: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/exports"),
            parquet: false,
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    #[serde(rename = "macro")]
    pub macro_series: MacroConfig,
    pub institutions: InstitutionConfig,
    pub store: StoreConfig,
    pub quality: QualityConfig,
    pub names: NameConfig,
    pub export: ExportConfig,
}

impl PipelineConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Content hash of the configuration, recorded in artifact sidecars.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let json =
            serde_json::to_vec(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.macro_series;
        if m.start > m.end {
            return Err(ConfigError::Invalid(format!(
                "macro start {} is after end {}",
                m.start, m.end
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for column in m
            .series
            .iter()
            .map(|s| s.column.as_str())
            .chain(m.growth.iter().map(|g| g.column.as_str()))
            .chain(m.spread.iter().map(|s| s.column.as_str()))
        {
            if column == "date" || !seen.insert(column) {
                return Err(ConfigError::Invalid(format!(
                    "macro column '{column}' is reserved or declared twice"
                )));
            }
        }
        if let Some(spread) = &m.spread {
            for operand in [&spread.minuend, &spread.subtrahend] {
                if !m.series.iter().any(|s| &s.column == operand) {
                    return Err(ConfigError::Invalid(format!(
                        "spread operand '{operand}' is not a configured series column"
                    )));
                }
            }
        }

        let i = &self.institutions;
        if i.start > i.end {
            return Err(ConfigError::Invalid(format!(
                "institution start {} is after end {}",
                i.start, i.end
            )));
        }
        if self.store.chunk_size == 0 {
            return Err(ConfigError::Invalid("store.chunk_size must be at least 1".into()));
        }
        if self.quality.nim_min > self.quality.nim_max {
            return Err(ConfigError::Invalid(
                "quality.nim_min is greater than quality.nim_max".into(),
            ));
        }
        Ok(())
    }
}

/// Secrets read from the process environment (after loading `.env`).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub fred_api_key: Option<String>,
}

impl Credentials {
    /// Load `.env` if present, then read credentials from the environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            fred_api_key: std::env::var(FRED_API_KEY).ok(),
        }
    }

    /// The FRED key, rejecting absent, blank and placeholder values.
    pub fn fred_api_key(&self) -> Result<&str, ConfigError> {
        let key = self
            .fred_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingCredential {
                name: FRED_API_KEY.into(),
            })?;
        if key == FRED_KEY_PLACEHOLDER {
            return Err(ConfigError::PlaceholderCredential {
                name: FRED_API_KEY.into(),
            });
        }
        Ok(key)
    }
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}
