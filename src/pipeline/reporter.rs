use super::context::RunContext;
use crate::clients::FailureSink;
use crate::error::{ReportError, ReportResult, StageFailure};
use crate::types::{FailureEvent, FailureType};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Emits failure events to the ingestion sink
///
/// Delivery is fire-and-forget: a failed or slow delivery is logged and
/// dropped, never retried, and never changes the outcome of the run.
#[derive(Clone)]
pub struct FailureReporter {
    sink: Arc<dyn FailureSink>,
    timeout: Duration,
}

impl FailureReporter {
    pub fn new(sink: Arc<dyn FailureSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Build the event describing a classified stage failure
    pub fn event_for(
        context: &RunContext,
        action_name: &str,
        failure_type: FailureType,
        error: &ReportError,
    ) -> FailureEvent {
        let (error_code, error_message) = match error.stage_failure() {
            Some(failure) => (failure.code.clone(), failure.message.clone()),
            None => ("PipelineError".to_string(), error.to_string()),
        };

        FailureEvent {
            time_generated: Utc::now(),
            workflow_name: context.workflow_name().to_string(),
            workflow_run_id: context.run_id().to_string(),
            failure_type,
            action_name: action_name.to_string(),
            error_code,
            error_message,
            severity: failure_type.severity(),
            blob_path: error.blob_path().map(str::to_string),
        }
    }

    /// Deliver an event, logging instead of failing
    pub async fn report(&self, event: &FailureEvent) {
        match self.try_report(event).await {
            Ok(()) => info!(
                target: "pipeline::reporter",
                run_id = %event.workflow_run_id,
                failure_type = ?event.failure_type,
                action = %event.action_name,
                "Failure event delivered"
            ),
            Err(e) => warn!(
                target: "pipeline::reporter",
                run_id = %event.workflow_run_id,
                error = %e,
                "Failure event could not be delivered; dropping it"
            ),
        }
    }

    /// Deliver an event, surfacing delivery errors
    pub async fn try_report(&self, event: &FailureEvent) -> ReportResult<()> {
        match tokio::time::timeout(self.timeout, self.sink.ingest(event)).await {
            Ok(result) => result.map_err(ReportError::ReportingFailed),
            Err(_) => Err(ReportError::ReportingFailed(StageFailure::timed_out(format!(
                "Failure ingestion exceeded {}s",
                self.timeout.as_secs()
            )))),
        }
    }
}
