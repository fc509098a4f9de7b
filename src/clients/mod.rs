//! External collaborators of the pipeline
//!
//! The pipeline never talks to the network directly. It is handed three
//! clients at construction:
//!
//! ```text
//! ┌──────────────┐  query   ┌──────────────────────────────┐
//! │ QueryStage   │ ───────▶ │ LogStore                     │
//! └──────────────┘          │  HttpLogStore / InMemory...  │
//!                           └──────────────────────────────┘
//! ┌──────────────┐  put     ┌──────────────────────────────┐
//! │ PublishStage │ ───────▶ │ BlobStore                    │
//! └──────────────┘          │  HttpBlobStore / File / Mem  │
//!                           └──────────────────────────────┘
//! ┌──────────────┐  ingest  ┌──────────────────────────────┐
//! │ Reporter     │ ───────▶ │ FailureSink                  │
//! └──────────────┘          │  HttpFailureSink / Recording │
//!                           └──────────────────────────────┘
//! ```
//!
//! Every call reports errors as a [`StageFailure`] so stages classify them the
//! same way.

pub mod factory;
pub mod file;
pub mod http;
pub mod memory;

pub use factory::{ClientFactory, Clients};
pub use file::FileBlobStore;
pub use http::{HttpBlobStore, HttpFailureSink, HttpLogStore};
pub use memory::{
    GatewayRequest, InMemoryBlobStore, InMemoryLogStore, RecordingFailureSink, UsageDetail,
};

use crate::error::StageFailure;
use crate::types::{BlobLocation, FailureEvent};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One query against the log store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Workspace / source identifier
    pub workspace_id: String,

    /// Query language text
    pub query: String,

    /// Lookback window ending at `window_end`
    pub lookback: Duration,

    /// End of the query window (run start time)
    pub window_end: DateTime<Utc>,
}

impl QueryRequest {
    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_end - self.lookback
    }

    /// ISO-8601 interval (`start/end`) bounding the query
    pub fn timespan(&self) -> String {
        format!(
            "{}/{}",
            self.window_start().to_rfc3339_opts(SecondsFormat::Secs, true),
            self.window_end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Column descriptor of a tabular result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: String,
}

impl QueryColumn {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
        }
    }
}

/// Tabular query result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryTable {
    #[serde(default)]
    pub name: String,
    pub columns: Vec<QueryColumn>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryTable {
    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Source of aggregated usage data
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Execute a query and return its primary result table
    async fn query(&self, request: &QueryRequest) -> Result<QueryTable, StageFailure>;
}

/// Durable blob storage for report output
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `payload` at `location`, replacing any previous content
    async fn put(&self, location: &BlobLocation, payload: Vec<u8>) -> Result<(), StageFailure>;

    /// Read the blob at `location`, if present
    async fn get(&self, location: &BlobLocation) -> Result<Option<Vec<u8>>, StageFailure>;
}

/// Structured-log ingestion endpoint for failure events
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn ingest(&self, event: &FailureEvent) -> Result<(), StageFailure>;
}
