use crate::types::{FailureType, StageStatus};
use thiserror::Error;

/// Failure reported by an external client (log store, blob store, ingestion sink)
///
/// Every client speaks the same status vocabulary so the query and publish
/// stages classify failures identically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status} [{code}]: {message}")]
pub struct StageFailure {
    pub status: StageStatus,
    pub code: String,
    pub message: String,
}

impl StageFailure {
    pub fn new(status: StageStatus, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Hard failure (`StageStatus::Failed`)
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StageStatus::Failed, code, message)
    }

    /// Timeout failure (`StageStatus::TimedOut`)
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(StageStatus::TimedOut, "ActionTimedOut", message)
    }
}

/// Central error type for the chargeback report pipeline
#[derive(Error, Debug)]
pub enum ReportError {
    // ============================================================================
    // Stage Errors
    // ============================================================================
    #[error("Usage query failed: {0}")]
    QueryFailed(StageFailure),

    #[error("Failed to write report to {path}: {failure}")]
    BlobWriteFailed { path: String, failure: StageFailure },

    #[error("Failed to encode report: {0}")]
    EncodingFailed(String),

    // ============================================================================
    // Failure Reporting Errors
    // ============================================================================
    #[error("Failed to deliver failure event: {0}")]
    ReportingFailed(StageFailure),

    // ============================================================================
    // Pipeline Errors
    // ============================================================================
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Builder pattern validation error
    #[error("Builder error: {0}")]
    BuilderError(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ReportError {
    /// Failure category recorded in the failure event, if this error has one
    ///
    /// Only query and blob write failures are classified; anything else is an
    /// unrecoverable error that propagates to the caller without an event.
    pub fn failure_type(&self) -> Option<FailureType> {
        match self {
            ReportError::QueryFailed(_) => Some(FailureType::QueryFailure),
            ReportError::BlobWriteFailed { .. } => Some(FailureType::BlobWriteFailure),
            _ => None,
        }
    }

    /// Client-level failure details, if the error came from an external client
    pub fn stage_failure(&self) -> Option<&StageFailure> {
        match self {
            ReportError::QueryFailed(failure)
            | ReportError::BlobWriteFailed { failure, .. }
            | ReportError::ReportingFailed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Attempted blob path for publish failures
    pub fn blob_path(&self) -> Option<&str> {
        match self {
            ReportError::BlobWriteFailed { path, .. } => Some(path),
            _ => None,
        }
    }
}

// Helper type alias for Results
pub type ReportResult<T> = Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReportError::QueryFailed(StageFailure::timed_out("query exceeded 30s"));
        assert_eq!(
            err.to_string(),
            "Usage query failed: TimedOut [ActionTimedOut]: query exceeded 30s"
        );
    }

    #[test]
    fn test_failure_type_classification() {
        let query = ReportError::QueryFailed(StageFailure::failed("BadQuery", "syntax error"));
        assert_eq!(query.failure_type(), Some(FailureType::QueryFailure));
        assert!(query.blob_path().is_none());

        let blob = ReportError::BlobWriteFailed {
            path: "reportoutput/daily.csv".to_string(),
            failure: StageFailure::failed("AuthorizationFailure", "forbidden"),
        };
        assert_eq!(blob.failure_type(), Some(FailureType::BlobWriteFailure));
        assert_eq!(blob.blob_path(), Some("reportoutput/daily.csv"));

        let encoding = ReportError::EncodingFailed("NUL in field".to_string());
        assert_eq!(encoding.failure_type(), None);
        assert!(encoding.stage_failure().is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let report_err: ReportError = io_err.into();
        assert!(matches!(report_err, ReportError::Io(_)));
    }

    #[test]
    fn test_stage_failure_constructors() {
        assert_eq!(StageFailure::timed_out("x").status, StageStatus::TimedOut);
        assert_eq!(StageFailure::failed("Code", "x").code, "Code");
    }
}
