//! Domain types shared across the pipeline.

pub mod frame;
pub mod ids;
pub mod institution;
pub mod panel;

pub use ids::{CertNumber, DatasetHash};
pub use institution::{InstitutionProfile, InstitutionRecord, Metric, MetricsRow};
pub use panel::MonthlyPanel;
