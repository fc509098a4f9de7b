/// State Machine Pattern for Report Runs
///
/// This module implements a type-safe state machine that enforces valid state transitions
/// at compile time. Invalid states and transitions are impossible to represent.
///
/// # States
///
/// - `NotStarted` - Run created
/// - `Querying` - Usage query in flight
/// - `Transforming` - Building the CSV document
/// - `Publishing` - Writing the report blob
/// - `Succeeded` - Report delivered (terminal)
/// - `Failed` - A stage failed (terminal)
///
/// Runs only move forward; there is no path back to an earlier state.
///
/// # Example
///
/// ```
/// use chargeback_lib::state_machine::ReportRun;
///
/// let run = ReportRun::new("daily-chargeback-report");
/// let run = run.start_query();
/// let run = run.begin_transform();
/// let run = run.begin_publish();
/// let run = run.succeed();
/// ```
pub mod states;
pub mod transitions;
pub mod wrapper;

pub use states::*;
pub use wrapper::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Report run with type-safe state
///
/// The generic parameter `S` represents the current state of the run.
/// This ensures that only valid operations for the current state can be called.
#[derive(Debug, Clone)]
pub struct ReportRun<S> {
    /// Unique run identifier
    pub run_id: Uuid,

    /// Current state (type parameter ensures type safety)
    pub state: S,

    /// Run metadata (available in all states)
    pub metadata: RunMetadata,
}

/// Metadata available in all states
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Workflow the run belongs to
    pub workflow_name: String,

    /// When the run was created
    pub created_at: DateTime<Utc>,
}

impl<S> ReportRun<S> {
    /// Get the run ID
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Get run metadata
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }
}
