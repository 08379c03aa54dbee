//! BankPulse CLI: fetch, validate, seed and export commands.
//!
//! Commands:
//! - `fetch-macro`: fetch FRED series, normalize to monthly, write the macro CSV
//! - `fetch-banks`: fetch FDIC filings for the cohort, write the institution CSV
//! - `search`: look up institutions by name, city, state or CERT
//! - `compare`: one metric across several institutions, by report date
//! - `validate`: run the quality gate over a written CSV
//! - `seed`: reconcile the CSV artifacts into the SQLite store
//! - `export`: dump the store into a timestamped export directory
//! - `run`: fetch both sources, gate, write artifacts, seed the store

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use bankpulse_core::data::export;
use bankpulse_core::data::institution::{compare_metric, search};
use bankpulse_core::data::quality::QualityProfile;
use bankpulse_core::data::{Canonicalizer, FdicClient, InstitutionQuery, TargetSchema, TracingProgress};
use bankpulse_core::domain::CertNumber;
use bankpulse_core::pipeline;
use bankpulse_core::store::Store;
use bankpulse_core::{Credentials, PipelineConfig};

#[derive(Parser)]
#[command(
    name = "bankpulse",
    about = "BankPulse CLI: bank performance and macro data pipeline"
)]
struct Cli {
    /// Path to a TOML pipeline config. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch FRED series and write the monthly macro CSV.
    FetchMacro {
        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<String>,

        /// Output CSV path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Fetch FDIC filings for the cohort and write the institution CSV.
    FetchBanks {
        /// CERT numbers to fetch instead of the configured cohort.
        #[arg(long = "cert")]
        certs: Vec<u32>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<String>,

        /// Output CSV path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Search institutions.
    Search {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        city: Option<String>,

        /// Two-letter code or full state name.
        #[arg(long)]
        state: Option<String>,

        #[arg(long)]
        cert: Option<u32>,

        #[arg(long, default_value_t = 20)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Compare one field across institutions.
    Compare {
        /// CERT numbers to compare.
        #[arg(long = "cert", required = true)]
        certs: Vec<u32>,

        /// Metric column (e.g. return_on_assets) or raw FDIC field (e.g. ROA).
        #[arg(long)]
        field: String,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<String>,

        /// Write the comparison to this CSV instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run the quality gate over a CSV artifact.
    Validate {
        /// Which gate to apply.
        #[arg(value_enum)]
        kind: ArtifactKind,

        /// CSV to check. Defaults to the configured output for `kind`.
        path: Option<PathBuf>,
    },
    /// Reconcile the CSV artifacts into the store.
    Seed {
        /// SQLite database path.
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Export the store to CSV.
    Export {
        /// SQLite database path.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Base directory for the timestamped export.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Also write Parquet snapshots.
        #[arg(long, default_value_t = false)]
        parquet: bool,
    },
    /// Fetch both sources, gate, write artifacts, seed the store.
    Run,
}

#[derive(Clone, Copy, ValueEnum)]
enum ArtifactKind {
    Macro,
    Banks,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::FetchMacro { start, end, output } => {
            if let Some(start) = parse_date(start.as_deref())? {
                config.macro_series.start = start;
            }
            if let Some(end) = parse_date(end.as_deref())? {
                config.macro_series.end = end;
            }
            if let Some(output) = output {
                config.macro_series.output = output;
            }
            config.validate()?;
            run_fetch_macro(&config)
        }
        Commands::FetchBanks {
            certs,
            start,
            end,
            output,
        } => {
            if !certs.is_empty() {
                config.institutions.cohort = certs.into_iter().map(CertNumber).collect();
            }
            if let Some(start) = parse_date(start.as_deref())? {
                config.institutions.start = start;
            }
            if let Some(end) = parse_date(end.as_deref())? {
                config.institutions.end = end;
            }
            if let Some(output) = output {
                config.institutions.output = output;
            }
            config.validate()?;
            run_fetch_banks(&config)
        }
        Commands::Search {
            name,
            city,
            state,
            cert,
            limit,
            offset,
        } => {
            let query = InstitutionQuery {
                name,
                city,
                state,
                cert: cert.map(CertNumber),
                limit,
                offset,
            };
            run_search(&config, &query)
        }
        Commands::Compare {
            certs,
            field,
            start,
            end,
            output,
        } => {
            let start = parse_date(start.as_deref())?.unwrap_or(config.institutions.start);
            let end = parse_date(end.as_deref())?.unwrap_or(config.institutions.end);
            if start > end {
                bail!("start {start} is after end {end}");
            }
            let certs: Vec<CertNumber> = certs.into_iter().map(CertNumber).collect();
            run_compare(&config, &certs, &field, start, end, output.as_deref())
        }
        Commands::Validate { kind, path } => run_validate(&config, kind, path),
        Commands::Seed { db } => {
            if let Some(db) = db {
                config.store.path = db;
            }
            run_seed(&config)
        }
        Commands::Export { db, dir, parquet } => {
            if let Some(db) = db {
                config.store.path = db;
            }
            if let Some(dir) = dir {
                config.export.dir = dir;
            }
            config.export.parquet |= parquet;
            run_export(&config)
        }
        Commands::Run => run_all(&config),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
    })
    .transpose()
}

fn fdic_client(config: &PipelineConfig) -> Result<FdicClient> {
    Ok(FdicClient::new(Duration::from_secs(
        config.institutions.timeout_secs,
    ))?)
}

fn run_fetch_macro(config: &PipelineConfig) -> Result<()> {
    let credentials = Credentials::from_env();
    let fred = pipeline::fred_client(config, &credentials)?;
    let ingested = pipeline::ingest_macro(&fred, config)?;
    println!(
        "Wrote {} months x {} columns to {}",
        ingested.table.height(),
        ingested.table.width(),
        config.macro_series.output.display()
    );
    println!("{}", ingested.report.diagnostic());
    Ok(())
}

fn run_fetch_banks(config: &PipelineConfig) -> Result<()> {
    let fdic = fdic_client(config)?;
    let ingested = pipeline::ingest_institutions(&fdic, config, &TracingProgress)?;
    println!(
        "Wrote {} institution-quarters to {}",
        ingested.table.height(),
        config.institutions.output.display()
    );
    for (cert, reason) in &ingested.skipped {
        println!("  skipped CERT {cert}: {reason}");
    }
    println!("{}", ingested.report.diagnostic());
    Ok(())
}

fn run_search(config: &PipelineConfig, query: &InstitutionQuery) -> Result<()> {
    let fdic = fdic_client(config)?;
    let profiles = search(&fdic, query)?;
    if profiles.is_empty() {
        println!("No institutions found.");
        return Ok(());
    }

    println!(
        "{:>7}  {:<45} {:<20} {:<5} {:>7} {:>16}",
        "CERT", "Name", "City", "State", "Offices", "Assets ($K)"
    );
    println!("{}", "-".repeat(106));
    for p in &profiles {
        println!(
            "{:>7}  {:<45} {:<20} {:<5} {:>7} {:>16}",
            p.cert,
            p.name.as_deref().unwrap_or("-"),
            p.city.as_deref().unwrap_or("-"),
            p.domicile_code().unwrap_or_else(|| "-".into()),
            p.offices.map(|o| o.to_string()).unwrap_or_else(|| "-".into()),
            p.total_assets
                .map(|a| format!("{a:.0}"))
                .unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}

fn run_compare(
    config: &PipelineConfig,
    certs: &[CertNumber],
    field: &str,
    start: NaiveDate,
    end: NaiveDate,
    output: Option<&Path>,
) -> Result<()> {
    let fdic = fdic_client(config)?;
    let canon = Canonicalizer::new(&config.names)?;
    let table = compare_metric(
        &fdic,
        &canon,
        certs,
        field,
        start,
        end,
        Duration::from_millis(config.institutions.request_delay_ms),
    )?;

    match output {
        Some(path) => {
            export::write_csv(&table, path, None)?;
            println!("Wrote {} report dates to {}", table.height(), path.display());
        }
        None => println!("{table}"),
    }
    Ok(())
}

fn run_validate(config: &PipelineConfig, kind: ArtifactKind, path: Option<PathBuf>) -> Result<()> {
    let (default_path, profile, schema) = match kind {
        ArtifactKind::Macro => (
            &config.macro_series.output,
            QualityProfile::macro_panel(&config.quality),
            TargetSchema::economic_data(),
        ),
        ArtifactKind::Banks => (
            &config.institutions.output,
            QualityProfile::institutions(&config.quality),
            TargetSchema::bank_performance(),
        ),
    };
    let path = path.unwrap_or_else(|| default_path.clone());
    if !path.exists() {
        bail!("artifact not found: {}", path.display());
    }

    let report = pipeline::validate_artifact(&path, &profile, &schema)?;
    println!("{}", report.diagnostic());
    Ok(())
}

fn run_seed(config: &PipelineConfig) -> Result<()> {
    let mut store = Store::open(&config.store.path)?;
    let summaries = pipeline::seed_store(&mut store, config)?;
    if summaries.is_empty() {
        println!("No artifacts found; nothing seeded.");
    }
    for s in &summaries {
        println!(
            "{}: {} rows ({} inserted, {} updated)",
            s.table, s.rows, s.inserted, s.updated
        );
    }
    Ok(())
}

fn run_export(config: &PipelineConfig) -> Result<()> {
    if !config.store.path.exists() {
        bail!("store not found: {}", config.store.path.display());
    }
    let store = Store::open(&config.store.path)?;
    for path in pipeline::export_store(&store, config)? {
        println!("exported {}", path.display());
    }
    Ok(())
}

fn run_all(config: &PipelineConfig) -> Result<()> {
    let credentials = Credentials::from_env();
    let fred = pipeline::fred_client(config, &credentials)?;
    let fdic = fdic_client(config)?;

    let summary = pipeline::run(&fred, &fdic, config, &TracingProgress)?;
    println!(
        "Macro: {} months -> {}",
        summary.macro_rows,
        config.macro_series.output.display()
    );
    println!(
        "Banks: {} institution-quarters -> {}",
        summary.institution_rows,
        config.institutions.output.display()
    );
    for (cert, reason) in &summary.skipped {
        println!("  skipped CERT {cert}: {reason}");
    }
    for s in &summary.upserts {
        println!(
            "{}: {} rows ({} inserted, {} updated)",
            s.table, s.rows, s.inserted, s.updated
        );
    }
    Ok(())
}
