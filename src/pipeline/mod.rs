//! Report pipeline: query, transform, publish
//!
//! Stages run strictly in sequence over a per-run [`RunContext`]. Each stage
//! reads the previous stage's output from the context and stores its own.
//! The executor drives the run state machine alongside the stages; the first
//! failing stage ends the run, and query or publish failures are handed to
//! the [`FailureReporter`] before control returns.
//!
//! ```text
//!   QueryStage ──rows──▶ TransformStage ──document──▶ PublishStage
//!       │                                                  │
//!       └───────────── FailureReporter (on failure) ◀──────┘
//! ```

pub mod context;
pub mod core;
pub mod executor;
pub mod reporter;
pub mod stages;

// Re-export main types
pub use context::RunContext;
pub use self::core::{PipelineResult, PipelineStage, StageResult};
pub use executor::{ReportPipeline, ReportPipelineBuilder, RunOutcome};
pub use reporter::FailureReporter;
pub use stages::{PublishStage, QueryStage, TransformStage};
