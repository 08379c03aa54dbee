//! Pipeline orchestration: fetch, gate, write artifacts, seed the store.
//!
//! Entry points:
//! - `ingest_macro()` / `ingest_institutions()`: one source, gated, written to CSV.
//! - `validate_artifact()`: re-run the quality gate over a written CSV.
//! - `seed_store()`: reconcile the CSV artifacts into the store.
//! - `export_store()`: dump the store into a timestamped export directory.
//! - `run()`: both sources end to end. Both gates run before anything is written.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use polars::prelude::{DataFrame, PolarsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigError, Credentials, PipelineConfig};
use crate::data::canonicalize::Canonicalizer;
use crate::data::export::{self, ArtifactMeta, ExportError};
use crate::data::fred::FredClient;
use crate::data::institution::fetch_cohort;
use crate::data::macro_series::fetch_macro_panel;
use crate::data::provider::{DataError, FetchProgress, InstitutionProvider, MacroProvider};
use crate::data::quality::{check, QualityError, QualityProfile, QualityReport};
use crate::data::schema::{SchemaError, TargetSchema};
use crate::domain::CertNumber;
use crate::store::{reconcile, Store, StoreError, UpsertSummary};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("{0}")]
    Quality(#[from] QualityError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("export error: {0}")]
    Export(#[from] ExportError),
    #[error("invalid name cleanup rule: {0}")]
    NameRules(#[from] regex::Error),
    #[error("dataframe error: {0}")]
    Frame(#[from] PolarsError),
}

/// A gated frame and the artifact it was written to.
#[derive(Debug)]
pub struct Ingested {
    pub table: DataFrame,
    pub report: QualityReport,
    pub meta: ArtifactMeta,
    pub skipped: Vec<(CertNumber, String)>,
}

/// What a full run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub macro_rows: usize,
    pub institution_rows: usize,
    pub skipped: Vec<(CertNumber, String)>,
    pub upserts: Vec<UpsertSummary>,
    pub config_fingerprint: String,
}

/// FRED client built from the environment. Fails before any request when the
/// key is missing or still the placeholder.
pub fn fred_client(
    config: &PipelineConfig,
    credentials: &Credentials,
) -> Result<FredClient, PipelineError> {
    let key = credentials.fred_api_key()?;
    Ok(FredClient::new(
        key,
        Duration::from_secs(config.institutions.timeout_secs),
    )?)
}

fn macro_table(
    provider: &dyn MacroProvider,
    config: &PipelineConfig,
) -> Result<(DataFrame, QualityReport), PipelineError> {
    let panel = fetch_macro_panel(provider, &config.macro_series)?;
    let table = panel.to_frame()?;
    let report = check(&table, &QualityProfile::macro_panel(&config.quality))?.into_result()?;
    Ok((table, report))
}

fn institution_table(
    provider: &dyn InstitutionProvider,
    config: &PipelineConfig,
    progress: &dyn FetchProgress,
) -> Result<(DataFrame, QualityReport, Vec<(CertNumber, String)>), PipelineError> {
    let canon = Canonicalizer::new(&config.names)?;
    let outcome = fetch_cohort(provider, &config.institutions, &canon, progress)?;
    for (cert, reason) in &outcome.skipped {
        tracing::warn!(%cert, reason = %reason, "institution skipped");
    }
    let table = outcome.to_frame()?;
    let report = check(&table, &QualityProfile::institutions(&config.quality))?.into_result()?;
    Ok((table, report, outcome.skipped))
}

/// Write the CSV artifact and, if configured, its Parquet snapshot.
fn write_artifact(
    table: &DataFrame,
    path: &Path,
    config: &PipelineConfig,
) -> Result<ArtifactMeta, PipelineError> {
    let fingerprint = config.fingerprint()?;
    let meta = export::write_csv(table, path, Some(&fingerprint))?;
    if config.export.parquet {
        export::write_parquet(table, &path.with_extension("parquet"))?;
    }
    Ok(meta)
}

/// Fetch the macro panel, gate it and write `macro.output`.
pub fn ingest_macro(
    provider: &dyn MacroProvider,
    config: &PipelineConfig,
) -> Result<Ingested, PipelineError> {
    let (table, report) = macro_table(provider, config)?;
    let meta = write_artifact(&table, &config.macro_series.output, config)?;
    Ok(Ingested {
        table,
        report,
        meta,
        skipped: Vec::new(),
    })
}

/// Fetch the institution cohort, gate it and write `institutions.output`.
pub fn ingest_institutions(
    provider: &dyn InstitutionProvider,
    config: &PipelineConfig,
    progress: &dyn FetchProgress,
) -> Result<Ingested, PipelineError> {
    let (table, report, skipped) = institution_table(provider, config, progress)?;
    let meta = write_artifact(&table, &config.institutions.output, config)?;
    Ok(Ingested {
        table,
        report,
        meta,
        skipped,
    })
}

/// Re-run the quality gate over a CSV artifact read with `schema`'s dtypes.
///
/// A sidecar whose hash no longer matches the file is logged, not fatal.
pub fn validate_artifact(
    path: &Path,
    profile: &QualityProfile,
    schema: &TargetSchema,
) -> Result<QualityReport, PipelineError> {
    let table = export::read_csv(path, Some(&schema.incoming_dtypes()))?;
    if export::meta_path(path).exists() && !export::verify(path)? {
        tracing::warn!(path = %path.display(), "artifact changed since its sidecar was written");
    }
    Ok(check(&table, profile)?.into_result()?)
}

fn load_into(
    store: &mut Store,
    table: &DataFrame,
    schema: &TargetSchema,
    canon: &Canonicalizer,
    config: &PipelineConfig,
) -> Result<UpsertSummary, PipelineError> {
    let reconciled = reconcile(table, schema, canon)?;
    Ok(store.upsert(
        &reconciled,
        schema,
        config.store.conflict_policy,
        config.store.chunk_size,
    )?)
}

/// Gate and upsert the CSV artifacts named in `config`. Missing files are
/// skipped with a warning.
pub fn seed_store(
    store: &mut Store,
    config: &PipelineConfig,
) -> Result<Vec<UpsertSummary>, PipelineError> {
    let canon = Canonicalizer::new(&config.names)?;
    let sources = [
        (
            &config.macro_series.output,
            TargetSchema::economic_data(),
            QualityProfile::macro_panel(&config.quality),
        ),
        (
            &config.institutions.output,
            TargetSchema::bank_performance(),
            QualityProfile::institutions(&config.quality),
        ),
    ];

    let mut summaries = Vec::new();
    for (path, schema, profile) in sources {
        if !path.exists() {
            tracing::warn!(path = %path.display(), table = %schema.table, "artifact not found, skipping");
            continue;
        }
        let table = export::read_csv(path, Some(&schema.incoming_dtypes()))?;
        check(&table, &profile)?.into_result()?;
        summaries.push(load_into(store, &table, &schema, &canon, config)?);
    }
    Ok(summaries)
}

/// Dump both store tables and the active-institution join into
/// `<export.dir>/export_<timestamp>/`. Returns the written files.
pub fn export_store(store: &Store, config: &PipelineConfig) -> Result<Vec<PathBuf>, PipelineError> {
    let dir = export::export_dir(&config.export.dir, Utc::now())?;
    let fingerprint = config.fingerprint()?;

    let tables = [
        ("bank_performance.csv", store.load_table(&TargetSchema::bank_performance())?),
        ("economic_data.csv", store.load_table(&TargetSchema::economic_data())?),
        ("joined_active.csv", store.active_with_macro()?),
    ];

    let mut written = Vec::new();
    for (name, table) in tables {
        let path = dir.join(name);
        let meta = export::write_csv(&table, &path, Some(&fingerprint))?;
        if config.export.parquet {
            export::write_parquet(&table, &path.with_extension("parquet"))?;
        }
        tracing::info!(path = %path.display(), rows = meta.rows, cols = meta.columns.len(), "exported");
        written.push(path);
    }
    Ok(written)
}

/// Fetch both sources, gate both, write both artifacts, then upsert both
/// tables into the store at `store.path`.
pub fn run(
    macro_provider: &dyn MacroProvider,
    institution_provider: &dyn InstitutionProvider,
    config: &PipelineConfig,
    progress: &dyn FetchProgress,
) -> Result<RunSummary, PipelineError> {
    let fingerprint = config.fingerprint()?;
    tracing::info!(config = %fingerprint, "pipeline run started");

    let (macro_rows, _) = macro_table(macro_provider, config)?;
    let (bank_rows, _, skipped) = institution_table(institution_provider, config, progress)?;

    write_artifact(&macro_rows, &config.macro_series.output, config)?;
    write_artifact(&bank_rows, &config.institutions.output, config)?;

    let canon = Canonicalizer::new(&config.names)?;
    let mut store = Store::open(&config.store.path)?;
    let upserts = vec![
        load_into(
            &mut store,
            &macro_rows,
            &TargetSchema::economic_data(),
            &canon,
            config,
        )?,
        load_into(
            &mut store,
            &bank_rows,
            &TargetSchema::bank_performance(),
            &canon,
            config,
        )?,
    ];

    let summary = RunSummary {
        macro_rows: macro_rows.height(),
        institution_rows: bank_rows.height(),
        skipped,
        upserts,
        config_fingerprint: fingerprint,
    };
    tracing::info!(
        macro_rows = summary.macro_rows,
        institution_rows = summary.institution_rows,
        skipped = summary.skipped.len(),
        "pipeline run finished"
    );
    Ok(summary)
}
