use crate::clients::QueryRequest;
use crate::error::{ReportError, ReportResult};
use crate::types::{AggregationRow, BlobLocation, ReportDocument};
use std::collections::HashMap;

/// Per-run state handed from stage to stage
///
/// Holds the run identity, the inputs fixed at run start (query request,
/// target blob) and the typed outputs of each stage. One context belongs to
/// exactly one run and is dropped when the run ends.
///
/// # Example
/// ```
/// use chargeback_lib::clients::QueryRequest;
/// use chargeback_lib::pipeline::RunContext;
/// use chargeback_lib::types::BlobLocation;
///
/// let request = QueryRequest {
///     workspace_id: "ws-1".to_string(),
///     query: "Usage | take 1".to_string(),
///     lookback: chrono::Duration::hours(24),
///     window_end: chrono::Utc::now(),
/// };
/// let context = RunContext::new(
///     "run-123",
///     "daily-chargeback-report",
///     request,
///     BlobLocation::new("reportoutput", "dailyChargeBackReport.csv"),
/// );
///
/// assert!(context.rows().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Run ID recorded as `WorkflowRunId`
    run_id: String,

    workflow_name: String,

    request: QueryRequest,

    target: BlobLocation,

    /// QueryStage output
    rows: Option<Vec<AggregationRow>>,

    /// TransformStage output
    document: Option<ReportDocument>,

    /// Metadata about the run
    metadata: HashMap<String, String>,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        workflow_name: impl Into<String>,
        request: QueryRequest,
        target: BlobLocation,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_name: workflow_name.into(),
            request,
            target,
            rows: None,
            document: None,
            metadata: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    pub fn target(&self) -> &BlobLocation {
        &self.target
    }

    pub fn set_rows(&mut self, rows: Vec<AggregationRow>) {
        self.rows = Some(rows);
    }

    /// Rows produced by the query stage
    pub fn rows(&self) -> ReportResult<&[AggregationRow]> {
        self.rows
            .as_deref()
            .ok_or_else(|| Self::missing("rows"))
    }

    pub fn set_document(&mut self, document: ReportDocument) {
        self.document = Some(document);
    }

    /// Document produced by the transform stage
    pub fn document(&self) -> ReportResult<&ReportDocument> {
        self.document.as_ref().ok_or_else(|| Self::missing("document"))
    }

    /// Set metadata
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Get metadata
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    /// Get all metadata
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    fn missing(key: &str) -> ReportError {
        ReportError::PipelineError(format!("Required context value not found: {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn context() -> RunContext {
        RunContext::new(
            "run-123",
            "daily",
            QueryRequest {
                workspace_id: "ws-1".to_string(),
                query: "Usage".to_string(),
                lookback: chrono::Duration::hours(24),
                window_end: Utc::now(),
            },
            BlobLocation::new("reportoutput", "daily.csv"),
        )
    }

    #[test]
    fn test_context_creation() {
        let context = context();
        assert_eq!(context.run_id(), "run-123");
        assert_eq!(context.workflow_name(), "daily");
        assert_eq!(context.target().to_string(), "reportoutput/daily.csv");
        assert!(context.metadata().is_empty());
    }

    #[test]
    fn test_missing_outputs() {
        let context = context();

        let err = context.rows().unwrap_err();
        assert!(err.to_string().contains("Required context value not found: rows"));
        assert!(context.document().is_err());
    }

    #[test]
    fn test_stage_outputs() {
        let mut context = context();
        context.set_rows(Vec::new());
        context.set_document(ReportDocument::new("header\n".to_string(), 0));

        assert!(context.rows().unwrap().is_empty());
        assert_eq!(context.document().unwrap().as_str(), "header\n");
    }

    #[test]
    fn test_metadata() {
        let mut context = context();
        context.set_metadata("pipeline_name", "chargeback");
        context.set_metadata("row_count", "2");

        assert_eq!(context.get_metadata("pipeline_name"), Some("chargeback"));
        assert_eq!(context.metadata().len(), 2);
    }
}
