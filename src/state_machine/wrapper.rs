/// Type-erased wrapper for ReportRun<S>
///
/// This enum allows the executor to drive a run through phases chosen at
/// runtime while the typed transitions still decide what is legal.
use super::states::*;
use super::ReportRun;
use crate::error::{ReportError, ReportResult};
use crate::types::FailureType;
use uuid::Uuid;

/// Wrapper enum that can hold ReportRun in any state
#[derive(Debug, Clone)]
pub enum RunState {
    NotStarted(ReportRun<NotStarted>),
    Querying(ReportRun<Querying>),
    Transforming(ReportRun<Transforming>),
    Publishing(ReportRun<Publishing>),
    Succeeded(ReportRun<Succeeded>),
    Failed(ReportRun<Failed>),
}

impl RunState {
    /// Create a new run that has not started
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self::NotStarted(ReportRun::new(workflow_name))
    }

    pub fn with_run_id(run_id: Uuid, workflow_name: impl Into<String>) -> Self {
        Self::NotStarted(ReportRun::with_run_id(run_id, workflow_name))
    }

    /// Get the run ID
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::NotStarted(r) => r.run_id(),
            Self::Querying(r) => r.run_id(),
            Self::Transforming(r) => r.run_id(),
            Self::Publishing(r) => r.run_id(),
            Self::Succeeded(r) => r.run_id(),
            Self::Failed(r) => r.run_id(),
        }
    }

    /// Get the current state as a string
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::NotStarted(_) => "NotStarted",
            Self::Querying(_) => "Querying",
            Self::Transforming(_) => "Transforming",
            Self::Publishing(_) => "Publishing",
            Self::Succeeded(_) => "Succeeded",
            Self::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// Phase currently being worked on, if any
    pub fn phase(&self) -> Option<RunPhase> {
        match self {
            Self::Querying(_) => Some(RunPhase::Querying),
            Self::Transforming(_) => Some(RunPhase::Transforming),
            Self::Publishing(_) => Some(RunPhase::Publishing),
            _ => None,
        }
    }

    /// Move into `phase`, which must directly follow the current state
    pub fn enter(self, phase: RunPhase) -> ReportResult<Self> {
        match (self, phase) {
            (Self::NotStarted(run), RunPhase::Querying) => Ok(Self::Querying(run.start_query())),
            (Self::Querying(run), RunPhase::Transforming) => {
                Ok(Self::Transforming(run.begin_transform()))
            }
            (Self::Transforming(run), RunPhase::Publishing) => {
                Ok(Self::Publishing(run.begin_publish()))
            }
            (state, phase) => Err(ReportError::InvalidStateTransition(format!(
                "Cannot enter {} from {} state",
                phase,
                state.state_name()
            ))),
        }
    }

    /// Transition to Succeeded state (only from Publishing)
    pub fn succeed(self) -> ReportResult<Self> {
        match self {
            Self::Publishing(run) => Ok(Self::Succeeded(run.succeed())),
            other => Err(ReportError::InvalidStateTransition(format!(
                "Cannot succeed from {} state",
                other.state_name()
            ))),
        }
    }

    /// Transition to Failed state (only from a working phase)
    pub fn fail(self, failure_type: Option<FailureType>, error: String) -> ReportResult<Self> {
        match self {
            Self::Querying(run) => Ok(Self::Failed(run.fail(failure_type, error))),
            Self::Transforming(run) => Ok(Self::Failed(run.fail(failure_type, error))),
            Self::Publishing(run) => Ok(Self::Failed(run.fail(failure_type, error))),
            other => Err(ReportError::InvalidStateTransition(format!(
                "Cannot fail from {} state",
                other.state_name()
            ))),
        }
    }

    /// Get the error message if failed
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(r) => Some(r.error()),
            _ => None,
        }
    }

    /// Get the failure category if failed with one
    pub fn failure_type(&self) -> Option<FailureType> {
        match self {
            Self::Failed(r) => r.state.failure_type,
            _ => None,
        }
    }

    /// Phase in which the run failed
    pub fn failed_phase(&self) -> Option<RunPhase> {
        match self {
            Self::Failed(r) => Some(r.phase()),
            _ => None,
        }
    }
}
