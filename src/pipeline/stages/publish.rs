use crate::clients::BlobStore;
use crate::error::{ReportError, ReportResult, StageFailure};
use crate::pipeline::{PipelineStage, RunContext};
use crate::state_machine::RunPhase;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Stage that writes the report to its target blob, replacing any previous one
///
/// # Context Requirements
/// - Input: `document` from the transform stage, the run target
///
/// Failures are `ReportError::BlobWriteFailed` carrying the attempted path.
pub struct PublishStage {
    blob_store: Arc<dyn BlobStore>,
    timeout: Duration,
}

impl PublishStage {
    pub const NAME: &'static str = "UploadReportBlob";

    pub fn new(blob_store: Arc<dyn BlobStore>, timeout: Duration) -> Self {
        Self {
            blob_store,
            timeout,
        }
    }
}

#[async_trait]
impl PipelineStage for PublishStage {
    async fn execute(&self, context: &mut RunContext) -> ReportResult<()> {
        let target = context.target().clone();
        let payload = context.document()?.as_bytes().to_vec();
        let size = payload.len();

        info!(
            target: "pipeline::publish",
            run_id = %context.run_id(),
            "Writing {} bytes to {}",
            size,
            target
        );

        let failure = match tokio::time::timeout(self.timeout, self.blob_store.put(&target, payload))
            .await
        {
            Ok(Ok(())) => None,
            Ok(Err(failure)) => Some(failure),
            Err(_) => Some(StageFailure::timed_out(format!(
                "Blob write exceeded {}s",
                self.timeout.as_secs()
            ))),
        };

        if let Some(failure) = failure {
            return Err(ReportError::BlobWriteFailed {
                path: target.to_string(),
                failure,
            });
        }

        info!(
            target: "pipeline::publish",
            run_id = %context.run_id(),
            "Report published to {}",
            target
        );
        context.set_metadata("published_bytes", size.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn phase(&self) -> RunPhase {
        RunPhase::Publishing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{InMemoryBlobStore, QueryRequest};
    use crate::pipeline::stages::render_csv;
    use crate::types::{BlobLocation, StageStatus};
    use async_trait::async_trait;
    use chrono::Utc;

    fn context() -> RunContext {
        let mut context = RunContext::new(
            "run-1",
            "daily",
            QueryRequest {
                workspace_id: "ws-1".to_string(),
                query: "Usage".to_string(),
                lookback: chrono::Duration::hours(24),
                window_end: Utc::now(),
            },
            BlobLocation::new("reportoutput", "dailyChargeBackReport.csv"),
        );
        context.set_document(render_csv(&[]).unwrap());
        context
    }

    struct StalledBlobStore;

    #[async_trait]
    impl BlobStore for StalledBlobStore {
        async fn put(&self, _location: &BlobLocation, _payload: Vec<u8>) -> Result<(), StageFailure> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn get(&self, _location: &BlobLocation) -> Result<Option<Vec<u8>>, StageFailure> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_publish_writes_document() {
        let store = Arc::new(InMemoryBlobStore::new());
        let stage = PublishStage::new(store.clone(), Duration::from_secs(5));

        let mut context = context();
        stage.execute(&mut context).await.unwrap();

        let stored = store.get(context.target()).await.unwrap().unwrap();
        assert_eq!(stored, context.document().unwrap().as_bytes());
    }

    #[tokio::test]
    async fn test_publish_failure_carries_path() {
        let store = Arc::new(InMemoryBlobStore::new());
        store.fail_writes(StageFailure::failed("AuthorizationFailure", "forbidden"));
        let stage = PublishStage::new(store, Duration::from_secs(5));

        let err = stage.execute(&mut context()).await.unwrap_err();

        assert_eq!(err.blob_path(), Some("reportoutput/dailyChargeBackReport.csv"));
        assert_eq!(err.stage_failure().unwrap().status, StageStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_timeout() {
        let stage = PublishStage::new(Arc::new(StalledBlobStore), Duration::from_secs(2));

        let err = stage.execute(&mut context()).await.unwrap_err();

        assert!(matches!(err, ReportError::BlobWriteFailed { .. }));
        assert_eq!(err.stage_failure().unwrap().status, StageStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_publish_without_document() {
        let stage = PublishStage::new(Arc::new(InMemoryBlobStore::new()), Duration::from_secs(5));
        let mut context = RunContext::new(
            "run-1",
            "daily",
            QueryRequest {
                workspace_id: String::new(),
                query: "Usage".to_string(),
                lookback: chrono::Duration::hours(24),
                window_end: Utc::now(),
            },
            BlobLocation::new("reportoutput", "daily.csv"),
        );

        let err = stage.execute(&mut context).await.unwrap_err();
        assert!(matches!(err, ReportError::PipelineError(_)));
    }
}
