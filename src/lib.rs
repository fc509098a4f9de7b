//! Daily usage chargeback report
//!
//! Aggregates a day of gateway usage per (product, model), renders it as CSV
//! and publishes it to blob storage. Query and publish failures are reported
//! as structured events to a log ingestion endpoint.

pub mod clients;
pub mod config;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod query;
pub mod state_machine;
pub mod types;

pub use config::{ReportConfig, ReportConfigBuilder, ReportEnvironment};
pub use error::{ReportError, ReportResult, StageFailure};
pub use pipeline::{ReportPipeline, RunOutcome};
