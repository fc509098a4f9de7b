use crate::error::ReportResult;
use crate::state_machine::RunPhase;
use crate::types::StageStatus;
use async_trait::async_trait;
use std::time::Duration;

use super::context::RunContext;

/// A single stage in the report pipeline
///
/// Each stage reads its inputs from the run context, does its work and
/// writes its outputs back. Stages are executed sequentially by the
/// pipeline executor; the first error stops the run.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use chargeback_lib::error::ReportResult;
/// use chargeback_lib::pipeline::{PipelineStage, RunContext};
/// use chargeback_lib::state_machine::RunPhase;
///
/// struct CountStage;
///
/// #[async_trait]
/// impl PipelineStage for CountStage {
///     async fn execute(&self, context: &mut RunContext) -> ReportResult<()> {
///         let count = context.rows()?.len();
///         context.set_metadata("row_count", count.to_string());
///         Ok(())
///     }
///
///     fn name(&self) -> &str {
///         "CountRows"
///     }
///
///     fn phase(&self) -> RunPhase {
///         RunPhase::Transforming
///     }
/// }
/// ```
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Execute this stage
    ///
    /// If the stage fails, it should return an error which will stop the pipeline.
    async fn execute(&self, context: &mut RunContext) -> ReportResult<()>;

    /// Stage name, used as the action name in failure events
    fn name(&self) -> &str;

    /// Run phase this stage belongs to
    fn phase(&self) -> RunPhase;

    /// Called before execute() - useful for validation
    fn pre_execute(&self, _context: &RunContext) -> ReportResult<()> {
        Ok(())
    }
}

/// Result of a pipeline stage execution
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name
    pub stage_name: String,

    /// Outcome of the stage
    ///
    /// A client may fail a stage with `Skipped`; use [`StageResult::ran`]
    /// to tell that apart from a stage that never started.
    pub status: StageStatus,

    /// Whether the stage was started
    pub ran: bool,

    /// Error message if failed
    pub error: Option<String>,

    /// Duration of execution
    pub duration: Duration,
}

impl StageResult {
    /// Create a successful stage result
    pub fn success(stage_name: impl Into<String>, duration: Duration) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Succeeded,
            ran: true,
            error: None,
            duration,
        }
    }

    /// Create a failed stage result
    ///
    /// `status` distinguishes hard failures from timeouts.
    pub fn failure(
        stage_name: impl Into<String>,
        status: StageStatus,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            status,
            ran: true,
            error: Some(error.into()),
            duration,
        }
    }

    /// Create a result for a stage that never ran because an earlier one failed
    pub fn skipped(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Skipped,
            ran: false,
            error: None,
            duration: Duration::from_secs(0),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }

    /// True if the stage never ran because an earlier one failed
    pub fn is_skipped(&self) -> bool {
        !self.ran
    }

    /// True if the stage ran and did not succeed
    pub fn is_failed(&self) -> bool {
        self.ran && !self.succeeded()
    }
}

/// Result of a complete pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Pipeline name
    pub pipeline_name: String,

    /// Whether the pipeline succeeded
    pub success: bool,

    /// Results from each stage
    pub stage_results: Vec<StageResult>,

    /// Total duration
    pub total_duration: Duration,

    /// Error message if failed
    pub error: Option<String>,
}

impl PipelineResult {
    /// Create a successful pipeline result
    pub fn success(
        pipeline_name: impl Into<String>,
        stage_results: Vec<StageResult>,
        total_duration: Duration,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            success: true,
            stage_results,
            total_duration,
            error: None,
        }
    }

    /// Create a failed pipeline result
    pub fn failure(
        pipeline_name: impl Into<String>,
        stage_results: Vec<StageResult>,
        error: impl Into<String>,
        total_duration: Duration,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            success: false,
            stage_results,
            total_duration,
            error: Some(error.into()),
        }
    }

    /// Get the number of stages that were executed (not skipped)
    pub fn executed_stages(&self) -> usize {
        self.stage_results.iter().filter(|r| !r.is_skipped()).count()
    }

    /// Get the number of stages that were skipped
    pub fn skipped_stages(&self) -> usize {
        self.stage_results.iter().filter(|r| r.is_skipped()).count()
    }

    /// Get the stage that failed (if any)
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.is_failed())
    }

    /// Look up a stage result by name
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.stage_name == name)
    }
}
