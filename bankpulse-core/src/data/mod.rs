//! Data ingestion: provider clients, frequency normalization, identity
//! canonicalization, the quality gate and output artifacts.

pub mod align;
pub mod canonicalize;
pub mod export;
pub mod fdic;
pub mod fred;
mod http;
pub mod institution;
pub mod macro_series;
pub mod provider;
pub mod quality;
pub mod resample;
pub mod schema;

pub use canonicalize::Canonicalizer;
pub use export::{ArtifactMeta, ExportError};
pub use fdic::FdicClient;
pub use fred::FredClient;
pub use institution::{fetch_cohort, CohortOutcome};
pub use macro_series::fetch_macro_panel;
pub use provider::{
    DataError, FetchProgress, InstitutionProvider, InstitutionQuery, MacroProvider, NoProgress,
    RawRecord, TracingProgress,
};
pub use quality::{QualityError, QualityProfile, QualityReport};
pub use resample::{resample, ResamplePolicy};
pub use schema::{ColumnKind, ConflictPolicy, Derivation, SchemaError, TargetSchema};
