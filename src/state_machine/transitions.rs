/// State transition implementations
///
/// Each transition is a method that consumes the current state and returns a new state.
/// This ensures that invalid transitions are impossible at compile time.
use super::states::*;
use super::{ReportRun, RunMetadata};
use crate::types::FailureType;
use uuid::Uuid;

// ============================================================================
// NotStarted State Transitions
// ============================================================================

impl ReportRun<NotStarted> {
    /// Create a new run with a fresh run id
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self::with_run_id(Uuid::new_v4(), workflow_name)
    }

    /// Create a new run with a caller-supplied run id
    pub fn with_run_id(run_id: Uuid, workflow_name: impl Into<String>) -> Self {
        Self {
            run_id,
            state: NotStarted::new(),
            metadata: RunMetadata {
                workflow_name: workflow_name.into(),
                created_at: chrono::Utc::now(),
            },
        }
    }

    /// Transition to Querying state
    pub fn start_query(self) -> ReportRun<Querying> {
        ReportRun {
            run_id: self.run_id,
            state: Querying::new(),
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Querying State Transitions
// ============================================================================

impl ReportRun<Querying> {
    /// Transition to Transforming state
    pub fn begin_transform(self) -> ReportRun<Transforming> {
        ReportRun {
            run_id: self.run_id,
            state: Transforming::from_querying(self.state),
            metadata: self.metadata,
        }
    }

    /// Transition to Failed state
    pub fn fail(self, failure_type: Option<FailureType>, error: String) -> ReportRun<Failed> {
        ReportRun {
            run_id: self.run_id,
            state: Failed::new(RunPhase::Querying, failure_type, error),
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Transforming State Transitions
// ============================================================================

impl ReportRun<Transforming> {
    /// Transition to Publishing state
    pub fn begin_publish(self) -> ReportRun<Publishing> {
        ReportRun {
            run_id: self.run_id,
            state: Publishing::from_transforming(self.state),
            metadata: self.metadata,
        }
    }

    /// Transition to Failed state
    pub fn fail(self, failure_type: Option<FailureType>, error: String) -> ReportRun<Failed> {
        ReportRun {
            run_id: self.run_id,
            state: Failed::new(RunPhase::Transforming, failure_type, error),
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Publishing State Transitions
// ============================================================================

impl ReportRun<Publishing> {
    /// Transition to Succeeded state
    pub fn succeed(self) -> ReportRun<Succeeded> {
        ReportRun {
            run_id: self.run_id,
            state: Succeeded::from_publishing(self.state),
            metadata: self.metadata,
        }
    }

    /// Transition to Failed state
    pub fn fail(self, failure_type: Option<FailureType>, error: String) -> ReportRun<Failed> {
        ReportRun {
            run_id: self.run_id,
            state: Failed::new(RunPhase::Publishing, failure_type, error),
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Terminal states have no outgoing transitions
// ============================================================================

impl ReportRun<Failed> {
    pub fn error(&self) -> &str {
        &self.state.error
    }

    pub fn phase(&self) -> RunPhase {
        self.state.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_keeps_run_id() {
        let run = ReportRun::new("daily");
        let id = run.run_id();

        let run = run.start_query().begin_transform().begin_publish().succeed();
        assert_eq!(run.run_id(), id);
        assert_eq!(run.metadata().workflow_name, "daily");
    }

    #[test]
    fn test_query_failure() {
        let run = ReportRun::new("daily")
            .start_query()
            .fail(Some(FailureType::QueryFailure), "timed out".to_string());

        assert_eq!(run.phase(), RunPhase::Querying);
        assert_eq!(run.error(), "timed out");
        assert_eq!(run.state.failure_type, Some(FailureType::QueryFailure));
    }

    #[test]
    fn test_publish_failure() {
        let run = ReportRun::new("daily")
            .start_query()
            .begin_transform()
            .begin_publish()
            .fail(Some(FailureType::BlobWriteFailure), "forbidden".to_string());

        assert_eq!(run.phase(), RunPhase::Publishing);
    }

    #[test]
    fn test_transform_failure_is_unclassified() {
        let run = ReportRun::new("daily")
            .start_query()
            .begin_transform()
            .fail(None, "bad bytes".to_string());

        assert_eq!(run.phase(), RunPhase::Transforming);
        assert!(run.state.failure_type.is_none());
    }
}
