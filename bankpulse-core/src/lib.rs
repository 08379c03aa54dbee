//! BankPulse Core: ingestion and reconciliation of bank-performance and
//! macroeconomic data.
//!
//! - Provider clients for FRED (macro series) and FDIC BankFind (institution filings)
//! - Frequency normalization onto a contiguous monthly index
//! - Field-drift resolution and bank-name canonicalization
//! - Quality gate with concrete diagnostics
//! - Schema reconciliation and idempotent upserts into SQLite
//! - CSV/Parquet artifacts with hashed metadata sidecars

pub mod config;
pub mod data;
pub mod domain;
pub mod pipeline;
pub mod store;

pub use config::{ConfigError, Credentials, PipelineConfig};
pub use pipeline::{PipelineError, RunSummary};
