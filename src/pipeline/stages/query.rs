use crate::clients::LogStore;
use crate::error::{ReportError, ReportResult, StageFailure};
use crate::pipeline::{PipelineStage, RunContext};
use crate::query::decode_rows;
use crate::state_machine::RunPhase;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Stage that runs the usage aggregation query
///
/// # Context Requirements
/// - Input: the query request fixed at run start
///
/// # Context Outputs
/// - `rows` - aggregation rows, ordered by total tokens descending
/// - metadata `row_count`
///
/// Every failure, including a timeout or an undecodable result, is a
/// `ReportError::QueryFailed`. No partial results are stored.
pub struct QueryStage {
    log_store: Arc<dyn LogStore>,
    timeout: Duration,
}

impl QueryStage {
    pub const NAME: &'static str = "RunUsageQuery";

    pub fn new(log_store: Arc<dyn LogStore>, timeout: Duration) -> Self {
        Self { log_store, timeout }
    }
}

#[async_trait]
impl PipelineStage for QueryStage {
    async fn execute(&self, context: &mut RunContext) -> ReportResult<()> {
        let request = context.request().clone();

        info!(
            target: "pipeline::query",
            run_id = %context.run_id(),
            "Running usage query over {}",
            request.timespan()
        );
        debug!(target: "pipeline::query", "Query text:\n{}", request.query);

        let table = match tokio::time::timeout(self.timeout, self.log_store.query(&request)).await
        {
            Ok(result) => result.map_err(ReportError::QueryFailed)?,
            Err(_) => {
                return Err(ReportError::QueryFailed(StageFailure::timed_out(format!(
                    "Usage query exceeded {}s",
                    self.timeout.as_secs()
                ))))
            }
        };

        let rows = decode_rows(&table).map_err(ReportError::QueryFailed)?;

        info!(
            target: "pipeline::query",
            run_id = %context.run_id(),
            "Usage query returned {} groups",
            rows.len()
        );

        context.set_metadata("row_count", rows.len().to_string());
        context.set_rows(rows);
        Ok(())
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn phase(&self) -> RunPhase {
        RunPhase::Querying
    }

    fn pre_execute(&self, context: &RunContext) -> ReportResult<()> {
        if context.request().query.trim().is_empty() {
            return Err(ReportError::QueryFailed(StageFailure::failed(
                "BadQuery",
                "Query text is empty",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{GatewayRequest, InMemoryLogStore, QueryRequest, UsageDetail};
    use crate::types::{BlobLocation, StageStatus};
    use chrono::{TimeZone, Utc};

    fn context(query: &str) -> RunContext {
        RunContext::new(
            "run-1",
            "daily",
            QueryRequest {
                workspace_id: "ws-1".to_string(),
                query: query.to_string(),
                lookback: chrono::Duration::hours(24),
                window_end: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
            },
            BlobLocation::new("reportoutput", "daily.csv"),
        )
    }

    fn call(id: &str, product: &str, model: &str, total: u64) -> (GatewayRequest, UsageDetail) {
        (
            GatewayRequest {
                correlation_id: id.to_string(),
                time_generated: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                product_id: product.to_string(),
                region: "eastus".to_string(),
                caller_ip: "10.0.0.1".to_string(),
                cache: "none".to_string(),
                backend_id: "aoai-east".to_string(),
                is_success: true,
            },
            UsageDetail {
                correlation_id: id.to_string(),
                sequence_number: 0,
                model_name: model.to_string(),
                prompt_tokens: total / 2,
                completion_tokens: total - total / 2,
                total_tokens: total,
            },
        )
    }

    #[tokio::test]
    async fn test_query_orders_by_total_tokens() {
        let (r1, u1) = call("c1", "P1", "gpt-x", 500);
        let (r2, u2) = call("c2", "P2", "gpt-y", 1200);
        let store = InMemoryLogStore::new()
            .with_request(r1)
            .with_usage(u1)
            .with_request(r2)
            .with_usage(u2);
        let stage = QueryStage::new(Arc::new(store), Duration::from_secs(5));

        let mut context = context("Usage");
        stage.execute(&mut context).await.unwrap();

        let rows = context.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].product_id, "P2");
        assert_eq!(rows[1].product_id, "P1");
        assert_eq!(context.get_metadata("row_count"), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout() {
        let store = InMemoryLogStore::new().with_delay(Duration::from_secs(30));
        let stage = QueryStage::new(Arc::new(store), Duration::from_secs(1));

        let mut context = context("Usage");
        let err = stage.execute(&mut context).await.unwrap_err();

        match err {
            ReportError::QueryFailed(failure) => assert_eq!(failure.status, StageStatus::TimedOut),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(context.rows().is_err());
    }

    #[tokio::test]
    async fn test_store_failure_is_query_failure() {
        let store = InMemoryLogStore::new()
            .with_failure(StageFailure::failed("Unauthorized", "token expired"));
        let stage = QueryStage::new(Arc::new(store), Duration::from_secs(5));

        let mut context = context("Usage");
        let err = stage.execute(&mut context).await.unwrap_err();

        assert_eq!(err.stage_failure().unwrap().code, "Unauthorized");
        assert!(matches!(err, ReportError::QueryFailed(_)));
    }

    #[test]
    fn test_empty_query_rejected() {
        let stage = QueryStage::new(Arc::new(InMemoryLogStore::new()), Duration::from_secs(5));
        let err = stage.pre_execute(&context("  ")).unwrap_err();
        assert_eq!(err.stage_failure().unwrap().code, "BadQuery");
    }
}
