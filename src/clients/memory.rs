use super::{BlobStore, FailureSink, LogStore, QueryColumn, QueryRequest, QueryTable};
use crate::error::StageFailure;
use crate::query::RESULT_COLUMNS;
use crate::types::{BlobLocation, BoundedSet, FailureEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Gateway request log record
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub correlation_id: String,
    pub time_generated: DateTime<Utc>,
    pub product_id: String,
    pub region: String,
    pub caller_ip: String,
    pub cache: String,
    pub backend_id: String,
    pub is_success: bool,
}

/// Usage-detail log record (one part of a possibly multi-part record)
#[derive(Debug, Clone)]
pub struct UsageDetail {
    pub correlation_id: String,
    pub sequence_number: u32,
    pub model_name: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Running totals for one (product, model) group
struct GroupAccumulator {
    product_id: String,
    model_name: String,
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
    call_count: u64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    regions: BoundedSet,
    caller_ips: BoundedSet,
    caches: BoundedSet,
    backend_ids: BoundedSet,
}

impl GroupAccumulator {
    fn new(request: &GatewayRequest, usage: &UsageDetail) -> Self {
        Self {
            product_id: request.product_id.clone(),
            model_name: usage.model_name.clone(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            call_count: 0,
            first_seen: request.time_generated,
            last_seen: request.time_generated,
            regions: BoundedSet::new(),
            caller_ips: BoundedSet::new(),
            caches: BoundedSet::new(),
            backend_ids: BoundedSet::new(),
        }
    }

    fn add(&mut self, request: &GatewayRequest, usage: &UsageDetail) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(usage.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(usage.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(usage.total_tokens);
        self.call_count = self.call_count.saturating_add(1);
        self.first_seen = self.first_seen.min(request.time_generated);
        self.last_seen = self.last_seen.max(request.time_generated);
        self.regions.insert(request.region.as_str());
        self.caller_ips.insert(request.caller_ip.as_str());
        self.caches.insert(request.cache.as_str());
        self.backend_ids.insert(request.backend_id.as_str());
    }

    fn into_values(self) -> Vec<Value> {
        vec![
            json!(self.product_id),
            json!(self.model_name),
            json!(self.prompt_tokens),
            json!(self.completion_tokens),
            json!(self.total_tokens),
            json!(self.call_count),
            json!(self.first_seen.to_rfc3339()),
            json!(self.last_seen.to_rfc3339()),
            json!(Vec::<String>::from(self.regions)),
            json!(Vec::<String>::from(self.caller_ips)),
            json!(Vec::<String>::from(self.caches)),
            json!(Vec::<String>::from(self.backend_ids)),
        ]
    }
}

/// Log store that evaluates the usage aggregation over in-memory records
///
/// The query text is not parsed; the store always runs the usage
/// aggregation over the request window. Useful for development, the mock
/// environment and tests.
#[derive(Default)]
pub struct InMemoryLogStore {
    requests: Vec<GatewayRequest>,
    usage: Vec<UsageDetail>,

    /// Simulated network delay
    delay: Option<Duration>,

    /// Failure returned instead of a result
    failure: Option<StageFailure>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request(mut self, request: GatewayRequest) -> Self {
        self.requests.push(request);
        self
    }

    pub fn with_usage(mut self, usage: UsageDetail) -> Self {
        self.usage.push(usage);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_failure(mut self, failure: StageFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Join, filter and aggregate the records in `[start, end]`
    fn aggregate(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> QueryTable {
        let mut order: Vec<(String, String)> = Vec::new();
        let mut groups: HashMap<(String, String), GroupAccumulator> = HashMap::new();

        let requests = self.requests.iter().filter(|r| {
            r.is_success && r.time_generated >= start && r.time_generated <= end
        });

        for request in requests {
            let parts = self
                .usage
                .iter()
                .filter(|u| u.correlation_id == request.correlation_id && u.sequence_number == 0);

            for usage in parts {
                let key = (request.product_id.clone(), usage.model_name.clone());
                let group = groups.entry(key.clone()).or_insert_with(|| {
                    order.push(key);
                    GroupAccumulator::new(request, usage)
                });
                group.add(request, usage);
            }
        }

        let mut rows: Vec<GroupAccumulator> = order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .collect();
        rows.sort_by(|a, b| b.total_tokens.cmp(&a.total_tokens));

        QueryTable {
            name: "PrimaryResult".to_string(),
            columns: result_columns(),
            rows: rows.into_iter().map(GroupAccumulator::into_values).collect(),
        }
    }
}

fn result_columns() -> Vec<QueryColumn> {
    RESULT_COLUMNS
        .iter()
        .zip([
            "string", "string", "long", "long", "long", "long", "datetime", "datetime",
            "dynamic", "dynamic", "dynamic", "dynamic",
        ])
        .map(|(name, kind)| QueryColumn::new(*name, kind))
        .collect()
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn query(&self, request: &QueryRequest) -> Result<QueryTable, StageFailure> {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }

        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        Ok(self.aggregate(request.window_start(), request.window_end))
    }
}

/// Blob store backed by a map
///
/// Writes replace the whole blob, matching block-blob overwrite semantics.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<BlobLocation, Vec<u8>>>,
    failure: Mutex<Option<StageFailure>>,
    writes: Mutex<usize>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `failure`
    pub fn fail_writes(&self, failure: StageFailure) {
        if let Ok(mut slot) = self.failure.lock() {
            *slot = Some(failure);
        }
    }

    /// Number of write attempts, successful or not
    pub fn write_attempts(&self) -> usize {
        self.writes.lock().map(|n| *n).unwrap_or(0)
    }

    fn poisoned() -> StageFailure {
        StageFailure::failed("InternalError", "Blob store lock poisoned")
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, location: &BlobLocation, payload: Vec<u8>) -> Result<(), StageFailure> {
        *self.writes.lock().map_err(|_| Self::poisoned())? += 1;

        if let Some(failure) = self.failure.lock().map_err(|_| Self::poisoned())?.clone() {
            return Err(failure);
        }

        self.blobs
            .lock()
            .map_err(|_| Self::poisoned())?
            .insert(location.clone(), payload);
        Ok(())
    }

    async fn get(&self, location: &BlobLocation) -> Result<Option<Vec<u8>>, StageFailure> {
        Ok(self
            .blobs
            .lock()
            .map_err(|_| Self::poisoned())?
            .get(location)
            .cloned())
    }
}

/// Failure sink that keeps every event it receives
#[derive(Default)]
pub struct RecordingFailureSink {
    events: Mutex<Vec<FailureEvent>>,
    failure: Option<StageFailure>,
}

impl RecordingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects every event after recording the attempt
    pub fn failing(failure: StageFailure) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failure: Some(failure),
        }
    }

    pub fn events(&self) -> Vec<FailureEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FailureSink for RecordingFailureSink {
    async fn ingest(&self, event: &FailureEvent) -> Result<(), StageFailure> {
        self.events
            .lock()
            .map_err(|_| StageFailure::failed("InternalError", "Sink lock poisoned"))?
            .push(event.clone());

        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::decode_rows;
    use crate::types::MAX_SET_SIZE;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn request(id: &str, product: &str, hour: u32, success: bool) -> GatewayRequest {
        GatewayRequest {
            correlation_id: id.to_string(),
            time_generated: at(hour),
            product_id: product.to_string(),
            region: "eastus".to_string(),
            caller_ip: "10.0.0.1".to_string(),
            cache: "MISS".to_string(),
            backend_id: "aoai-east".to_string(),
            is_success: success,
        }
    }

    fn usage(id: &str, sequence: u32, model: &str, total: u64) -> UsageDetail {
        UsageDetail {
            correlation_id: id.to_string(),
            sequence_number: sequence,
            model_name: model.to_string(),
            prompt_tokens: total / 4,
            completion_tokens: total - total / 4,
            total_tokens: total,
        }
    }

    fn day_request() -> QueryRequest {
        QueryRequest {
            workspace_id: "ws".to_string(),
            query: String::new(),
            lookback: chrono::Duration::hours(24),
            window_end: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_aggregates_by_product_and_model() {
        let store = InMemoryLogStore::new()
            .with_request(request("c1", "P1", 1, true))
            .with_request(request("c2", "P1", 5, true))
            .with_request(request("c3", "P2", 3, true))
            .with_usage(usage("c1", 0, "gpt-x", 100))
            .with_usage(usage("c2", 0, "gpt-x", 300))
            .with_usage(usage("c3", 0, "gpt-y", 1200));

        let table = store.query(&day_request()).await.unwrap();
        let rows = decode_rows(&table).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].product_id, "P2");
        assert_eq!(rows[1].product_id, "P1");
        assert_eq!(rows[1].total_tokens, 400);
        assert_eq!(rows[1].call_count, 2);
        assert_eq!(rows[1].first_seen, at(1));
        assert_eq!(rows[1].last_seen, at(5));
    }

    #[tokio::test]
    async fn test_filters_failed_requests_and_later_sequence_parts() {
        let store = InMemoryLogStore::new()
            .with_request(request("c1", "P1", 1, true))
            .with_request(request("c2", "P1", 2, false))
            .with_usage(usage("c1", 0, "gpt-x", 100))
            .with_usage(usage("c1", 1, "gpt-x", 999))
            .with_usage(usage("c2", 0, "gpt-x", 500));

        let rows = decode_rows(&store.query(&day_request()).await.unwrap()).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_tokens, 100);
        assert_eq!(rows[0].call_count, 1);
    }

    #[tokio::test]
    async fn test_token_sums_saturate() {
        let store = InMemoryLogStore::new()
            .with_request(request("c1", "P1", 1, true))
            .with_request(request("c2", "P1", 2, true))
            .with_usage(usage("c1", 0, "gpt-x", u64::MAX))
            .with_usage(usage("c2", 0, "gpt-x", 10));

        let rows = decode_rows(&store.query(&day_request()).await.unwrap()).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_tokens, u64::MAX);
        assert_eq!(rows[0].prompt_tokens, u64::MAX / 4 + 2);
        assert_eq!(rows[0].call_count, 2);
    }

    #[tokio::test]
    async fn test_excludes_records_outside_window() {
        let mut old = request("c0", "P1", 0, true);
        old.time_generated = Utc.with_ymd_and_hms(2024, 2, 27, 0, 0, 0).unwrap();

        let store = InMemoryLogStore::new()
            .with_request(old)
            .with_usage(usage("c0", 0, "gpt-x", 100));

        let rows = decode_rows(&store.query(&day_request()).await.unwrap()).unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_multi_value_sets_are_capped() {
        let mut store = InMemoryLogStore::new();
        for i in 0..12 {
            let id = format!("c{}", i);
            let mut r = request(&id, "P1", 1, true);
            r.caller_ip = format!("10.0.0.{}", i);
            store = store.with_request(r).with_usage(usage(&id, 0, "gpt-x", 10));
        }

        let rows = decode_rows(&store.query(&day_request()).await.unwrap()).unwrap();
        assert_eq!(rows[0].call_count, 12);
        assert_eq!(rows[0].caller_ips.len(), MAX_SET_SIZE);
        assert_eq!(rows[0].regions.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = InMemoryLogStore::new().with_failure(StageFailure::failed("BadQuery", "nope"));
        let err = store.query(&day_request()).await.unwrap_err();
        assert_eq!(err.code, "BadQuery");
    }

    #[tokio::test]
    async fn test_blob_store_overwrites() {
        let store = InMemoryBlobStore::new();
        let location = BlobLocation::new("reportoutput", "daily.csv");

        store.put(&location, b"first".to_vec()).await.unwrap();
        store.put(&location, b"second".to_vec()).await.unwrap();

        assert_eq!(store.get(&location).await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.write_attempts(), 2);
    }

    #[tokio::test]
    async fn test_blob_store_failure_keeps_previous_content() {
        let store = InMemoryBlobStore::new();
        let location = BlobLocation::new("reportoutput", "daily.csv");
        store.put(&location, b"first".to_vec()).await.unwrap();

        store.fail_writes(StageFailure::failed("AuthorizationFailure", "forbidden"));
        assert!(store.put(&location, b"second".to_vec()).await.is_err());
        assert_eq!(store.get(&location).await.unwrap(), Some(b"first".to_vec()));
    }
}
