/// State type definitions for the report run state machine
///
/// Each state is a distinct type, making invalid states impossible to represent.
/// State-specific data is stored in each state type.
use crate::types::FailureType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// NotStarted state - Run created, no stage entered yet
#[derive(Debug, Clone)]
pub struct NotStarted;

/// Querying state - Usage query in flight
#[derive(Debug, Clone)]
pub struct Querying {
    pub started_at: DateTime<Utc>,
}

/// Transforming state - Rows being serialized to CSV
#[derive(Debug, Clone)]
pub struct Transforming {
    pub run_started_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

/// Publishing state - Report being written to blob storage
#[derive(Debug, Clone)]
pub struct Publishing {
    pub run_started_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

/// Succeeded state - Report delivered (terminal)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Succeeded {
    pub run_started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Failed state - A stage failed (terminal)
#[derive(Debug, Clone)]
pub struct Failed {
    /// When the failure occurred
    pub failed_at: DateTime<Utc>,

    /// Which phase failed
    pub phase: RunPhase,

    /// Failure category, `None` for unclassified errors
    pub failure_type: Option<FailureType>,

    /// Error message
    pub error: String,
}

/// Working phases of a run, in order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunPhase {
    Querying,
    Transforming,
    Publishing,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunPhase::Querying => "Querying",
            RunPhase::Transforming => "Transforming",
            RunPhase::Publishing => "Publishing",
        })
    }
}

impl NotStarted {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NotStarted {
    fn default() -> Self {
        Self::new()
    }
}

impl Querying {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
        }
    }
}

impl Default for Querying {
    fn default() -> Self {
        Self::new()
    }
}

impl Transforming {
    pub fn from_querying(querying: Querying) -> Self {
        Self {
            run_started_at: querying.started_at,
            started_at: Utc::now(),
        }
    }
}

impl Publishing {
    pub fn from_transforming(transforming: Transforming) -> Self {
        Self {
            run_started_at: transforming.run_started_at,
            started_at: Utc::now(),
        }
    }
}

impl Succeeded {
    pub fn from_publishing(publishing: Publishing) -> Self {
        Self {
            run_started_at: publishing.run_started_at,
            completed_at: Utc::now(),
        }
    }
}

impl Failed {
    pub fn new(phase: RunPhase, failure_type: Option<FailureType>, error: String) -> Self {
        Self {
            failed_at: Utc::now(),
            phase,
            failure_type,
            error,
        }
    }
}
