use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of distinct values kept per multi-value column
pub const MAX_SET_SIZE: usize = 8;

/// Outcome status shared by every external client call
///
/// Query and publish both report through this one enum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StageStatus {
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Succeeded => "Succeeded",
            StageStatus::Failed => "Failed",
            StageStatus::TimedOut => "TimedOut",
            StageStatus::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of failure categories accepted by the ingestion endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureType {
    QueryFailure,
    BlobWriteFailure,
}

impl FailureType {
    /// Severity assigned to this category
    ///
    /// Both categories prevent delivery of the report, so both are High.
    pub fn severity(&self) -> Severity {
        match self {
            FailureType::QueryFailure | FailureType::BlobWriteFailure => Severity::High,
        }
    }
}

/// Severity of a failure event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Container + path of a blob
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BlobLocation {
    pub container: String,
    pub path: String,
}

impl BlobLocation {
    pub fn new(container: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.path)
    }
}

/// Distinct values in first-seen order, capped at [`MAX_SET_SIZE`]
///
/// Inserts past the cap are dropped without error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct BoundedSet {
    values: Vec<String>,
}

impl BoundedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value; returns true if it was kept
    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.values.len() >= MAX_SET_SIZE || self.values.contains(&value) {
            return false;
        }
        self.values.push(value);
        true
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for BoundedSet {
    fn from(values: Vec<String>) -> Self {
        values.into_iter().collect()
    }
}

impl From<BoundedSet> for Vec<String> {
    fn from(set: BoundedSet) -> Self {
        set.values
    }
}

impl<S: Into<String>> FromIterator<S> for BoundedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = BoundedSet::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

/// One (product, model) group of the usage query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationRow {
    pub product_id: String,
    pub model_name: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub call_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub regions: BoundedSet,
    pub caller_ips: BoundedSet,
    pub caches: BoundedSet,
    pub backend_ids: BoundedSet,
}

impl AggregationRow {
    /// Aggregation key
    pub fn key(&self) -> (&str, &str) {
        (&self.product_id, &self.model_name)
    }
}

/// Serialized CSV report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDocument {
    text: String,
    row_count: usize,
}

impl ReportDocument {
    pub(crate) fn new(text: String, row_count: usize) -> Self {
        Self { text, row_count }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    /// Number of data rows (header excluded)
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.text.into_bytes()
    }
}

/// Structured record of a stage failure, as sent to the ingestion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailureEvent {
    pub time_generated: DateTime<Utc>,
    pub workflow_name: String,
    pub workflow_run_id: String,
    pub failure_type: FailureType,
    pub action_name: String,
    pub error_code: String,
    pub error_message: String,
    pub severity: Severity,
    /// Attempted target, set for blob write failures only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_set_caps_and_dedupes() {
        let mut set = BoundedSet::new();
        assert!(set.insert("eastus"));
        assert!(!set.insert("eastus"));

        for i in 0..20 {
            set.insert(format!("region-{}", i));
        }

        assert_eq!(set.len(), MAX_SET_SIZE);
        assert_eq!(set.iter().next(), Some("eastus"));
        assert!(!set.insert("late-arrival"));
    }

    #[test]
    fn test_bounded_set_from_vec_applies_cap() {
        let values: Vec<String> = (0..12).map(|i| format!("10.0.0.{}", i)).collect();
        let set = BoundedSet::from(values);
        assert_eq!(set.len(), MAX_SET_SIZE);
    }

    #[test]
    fn test_failure_event_wire_names() {
        let event = FailureEvent {
            time_generated: Utc::now(),
            workflow_name: "daily-chargeback".to_string(),
            workflow_run_id: "run-1".to_string(),
            failure_type: FailureType::QueryFailure,
            action_name: "Run Usage Query".to_string(),
            error_code: "BadQuery".to_string(),
            error_message: "syntax error".to_string(),
            severity: Severity::High,
            blob_path: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["WorkflowName"], "daily-chargeback");
        assert_eq!(json["WorkflowRunId"], "run-1");
        assert_eq!(json["FailureType"], "QueryFailure");
        assert_eq!(json["Severity"], "High");
        assert!(json.get("TimeGenerated").is_some());
        assert!(json.get("BlobPath").is_none());
    }

    #[test]
    fn test_failure_type_severity() {
        assert_eq!(FailureType::QueryFailure.severity(), Severity::High);
        assert_eq!(FailureType::BlobWriteFailure.severity(), Severity::High);
    }

    #[test]
    fn test_blob_location_display() {
        let location = BlobLocation::new("reportoutput", "dailyChargeBackReport.csv");
        assert_eq!(location.to_string(), "reportoutput/dailyChargeBackReport.csv");
    }
}
