use super::context::RunContext;
use super::core::{PipelineResult, PipelineStage, StageResult};
use super::reporter::FailureReporter;
use super::stages::{PublishStage, QueryStage, TransformStage};
use crate::clients::{Clients, QueryRequest};
use crate::config::ReportConfig;
use crate::error::{ReportError, ReportResult};
use crate::state_machine::{RunPhase, RunState};
use crate::types::{FailureEvent, StageStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

const PHASE_ORDER: [RunPhase; 3] = [
    RunPhase::Querying,
    RunPhase::Transforming,
    RunPhase::Publishing,
];

/// What one run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,

    /// Terminal state (`Succeeded` or `Failed`)
    pub state: RunState,

    /// Per-stage results
    pub result: PipelineResult,

    /// Event handed to the failure reporter, if the run failed
    pub failure_event: Option<FailureEvent>,

    /// Metadata recorded by the stages that ran (`row_count`, `published_bytes`)
    pub metadata: HashMap<String, String>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.state.is_succeeded()
    }
}

/// Report pipeline that runs query, transform and publish in sequence
///
/// # Example
/// ```no_run
/// use chargeback_lib::clients::ClientFactory;
/// use chargeback_lib::config::ReportConfig;
/// use chargeback_lib::pipeline::ReportPipeline;
///
/// # async fn run() -> chargeback_lib::error::ReportResult<()> {
/// let config = ReportConfig::default();
/// let clients = ClientFactory::create(&config, None)?;
/// let pipeline = ReportPipeline::new(config, clients);
///
/// let outcome = pipeline.run_once().await?;
/// assert!(outcome.is_success());
/// # Ok(())
/// # }
/// ```
pub struct ReportPipeline {
    config: ReportConfig,
    stages: Vec<Box<dyn PipelineStage>>,
    reporter: FailureReporter,
}

impl ReportPipeline {
    /// Standard pipeline over the given clients
    pub fn new(config: ReportConfig, clients: Clients) -> Self {
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(QueryStage::new(clients.log_store, config.timeouts.query())),
            Box::new(TransformStage::new()),
            Box::new(PublishStage::new(clients.blob_store, config.timeouts.publish())),
        ];
        let reporter = FailureReporter::new(clients.failure_sink, config.timeouts.report());

        Self {
            config,
            stages,
            reporter,
        }
    }

    /// Create a new pipeline builder
    pub fn builder(config: ReportConfig) -> ReportPipelineBuilder {
        ReportPipelineBuilder::new(config)
    }

    /// Get the pipeline name
    pub fn name(&self) -> &str {
        &self.config.workflow_name
    }

    /// Get the number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Run the pipeline once
    ///
    /// Query and publish failures end the run in `Failed`, emit exactly one
    /// failure event and return `Ok` with the outcome. Any other error
    /// (including a report that cannot be encoded) also fails the run but is
    /// returned as `Err` without an event.
    pub async fn run_once(&self) -> ReportResult<RunOutcome> {
        let run_id = Uuid::new_v4();
        let mut state = RunState::with_run_id(run_id, &self.config.workflow_name);
        let mut context = RunContext::new(
            run_id.to_string(),
            &self.config.workflow_name,
            QueryRequest {
                workspace_id: self.config.query.workspace_id.clone(),
                query: self.config.query_text(),
                lookback: self.config.lookback(),
                window_end: Utc::now(),
            },
            self.config.target.clone(),
        );

        info!(
            target: "pipeline",
            run_id = %run_id,
            "Starting pipeline '{}' with {} stages",
            self.name(),
            self.stages.len()
        );

        let pipeline_start = Instant::now();
        let mut stage_results = Vec::with_capacity(self.stages.len());

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_name = stage.name();
            state = state.enter(stage.phase())?;

            info!(
                target: "pipeline",
                run_id = %run_id,
                "Executing stage {}/{}: {}",
                index + 1,
                self.stages.len(),
                stage_name
            );

            let stage_start = Instant::now();
            let outcome = match stage.pre_execute(&context) {
                Ok(()) => stage.execute(&mut context).await,
                Err(e) => Err(e),
            };
            let duration = stage_start.elapsed();

            let err = match outcome {
                Ok(()) => {
                    info!(
                        target: "pipeline",
                        run_id = %run_id,
                        "Stage '{}' completed successfully in {:.2}s",
                        stage_name,
                        duration.as_secs_f64()
                    );
                    stage_results.push(StageResult::success(stage_name, duration));
                    continue;
                }
                Err(e) => e,
            };

            let status = err
                .stage_failure()
                .map(|f| f.status)
                .unwrap_or(StageStatus::Failed);
            error!(
                target: "pipeline",
                run_id = %run_id,
                "Stage '{}' {}: {}",
                stage_name,
                status,
                err
            );

            stage_results.push(StageResult::failure(stage_name, status, err.to_string(), duration));
            stage_results.extend(
                self.stages[index + 1..]
                    .iter()
                    .map(|s| StageResult::skipped(s.name())),
            );

            let failure_type = err.failure_type();
            let state = state.fail(failure_type, err.to_string())?;

            let Some(failure_type) = failure_type else {
                warn!(
                    target: "pipeline",
                    run_id = %run_id,
                    "Run ended in {} without a failure event",
                    state.state_name()
                );
                return Err(err);
            };

            let event = FailureReporter::event_for(&context, stage_name, failure_type, &err);
            self.reporter.report(&event).await;

            let result = PipelineResult::failure(
                self.name(),
                stage_results,
                err.to_string(),
                pipeline_start.elapsed(),
            );
            return Ok(RunOutcome {
                run_id,
                state,
                result,
                failure_event: Some(event),
                metadata: context.metadata().clone(),
            });
        }

        let state = state.succeed()?;
        let total_duration = pipeline_start.elapsed();

        info!(
            target: "pipeline",
            run_id = %run_id,
            "Pipeline '{}' completed successfully in {:.2}s",
            self.name(),
            total_duration.as_secs_f64()
        );

        Ok(RunOutcome {
            run_id,
            state,
            result: PipelineResult::success(self.name(), stage_results, total_duration),
            failure_event: None,
            metadata: context.metadata().clone(),
        })
    }
}

/// Builder for pipelines with custom stages
///
/// Stages must cover query, transform and publish once each, in that order.
pub struct ReportPipelineBuilder {
    config: ReportConfig,
    stages: Vec<Box<dyn PipelineStage>>,
    reporter: Option<FailureReporter>,
}

impl ReportPipelineBuilder {
    pub fn new(config: ReportConfig) -> Self {
        Self {
            config,
            stages: Vec::new(),
            reporter: None,
        }
    }

    /// Add a stage to the pipeline
    pub fn add_stage<S: PipelineStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Add a boxed stage to the pipeline
    pub fn add_boxed_stage(mut self, stage: Box<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn failure_reporter(mut self, reporter: FailureReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Build the pipeline
    ///
    /// # Errors
    /// Returns `ReportError::BuilderError` if no reporter is set or the stage
    /// phases are not query, transform, publish
    pub fn build(self) -> ReportResult<ReportPipeline> {
        let reporter = self
            .reporter
            .ok_or_else(|| ReportError::BuilderError("failure reporter is required".to_string()))?;

        let phases: Vec<RunPhase> = self.stages.iter().map(|s| s.phase()).collect();
        if phases != PHASE_ORDER {
            return Err(ReportError::BuilderError(format!(
                "stages must run {:?}, got {:?}",
                PHASE_ORDER, phases
            )));
        }

        Ok(ReportPipeline {
            config: self.config,
            stages: self.stages,
            reporter,
        })
    }
}
