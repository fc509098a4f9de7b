pub mod builder;

pub use builder::ReportConfigBuilder;

use crate::error::{ReportError, ReportResult};
use crate::logger::LogLevel;
use crate::query::UsageQuery;
use crate::types::BlobLocation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Report pipeline configuration
///
/// Everything the scheduler would otherwise hold implicitly (query text,
/// window, target, endpoints) is explicit here and handed to the pipeline at
/// construction. Credentials are not part of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    /// Name recorded as `WorkflowName` in failure events
    pub workflow_name: String,

    /// Which client implementations to use
    pub environment: ReportEnvironment,

    /// Usage query settings
    pub query: QueryConfig,

    /// Where the report is written
    pub target: BlobLocation,

    /// Per-stage time limits
    pub timeouts: TimeoutConfig,

    /// Live service endpoints (required for `Live`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<LiveEndpoints>,

    /// Write reports to this directory instead of memory in `Mock`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_blob_root: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is unset
    pub log_level: LogLevel,
}

/// Client environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReportEnvironment {
    /// In-memory / local clients, no network
    Mock,

    /// HTTP clients against the configured endpoints
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryConfig {
    pub workspace_id: String,

    /// Replaces the built-in aggregation query when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_text: Option<String>,

    pub lookback_hours: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub query_secs: u64,
    pub publish_secs: u64,
    pub report_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveEndpoints {
    pub log_query_url: String,
    pub blob_account_url: String,
    pub ingestion_endpoint: String,
    pub ingestion_rule_id: String,
    pub ingestion_stream: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            workflow_name: "daily-chargeback-report".to_string(),
            environment: ReportEnvironment::Mock,
            query: QueryConfig::default(),
            target: BlobLocation::new("reportoutput", "dailyChargeBackReport.csv"),
            timeouts: TimeoutConfig::default(),
            live: None,
            local_blob_root: None,
            log_level: LogLevel::Info,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            workspace_id: String::new(),
            query_text: None,
            lookback_hours: 24,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            query_secs: 120,
            publish_secs: 60,
            report_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_secs(self.publish_secs)
    }

    pub fn report(&self) -> Duration {
        Duration::from_secs(self.report_secs)
    }
}

impl ReportConfig {
    /// Load configuration from a JSON file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> ReportResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReportError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: ReportConfig = serde_json::from_str(&raw)
            .map_err(|e| ReportError::ConfigError(format!("Invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the pipeline relies on
    pub fn validate(&self) -> ReportResult<()> {
        if self.workflow_name.trim().is_empty() {
            return Err(ReportError::ConfigError("workflow_name is empty".to_string()));
        }
        if self.query.lookback_hours == 0 {
            return Err(ReportError::ConfigError(
                "query.lookback_hours must be positive".to_string(),
            ));
        }
        if self.target.container.trim().is_empty() || self.target.path.trim().is_empty() {
            return Err(ReportError::ConfigError(
                "target container and path are required".to_string(),
            ));
        }
        if self.timeouts.query_secs == 0
            || self.timeouts.publish_secs == 0
            || self.timeouts.report_secs == 0
        {
            return Err(ReportError::ConfigError("timeouts must be positive".to_string()));
        }
        if self.environment == ReportEnvironment::Live {
            if self.live.is_none() {
                return Err(ReportError::ConfigError(
                    "Live environment requires live endpoints".to_string(),
                ));
            }
            if self.query.workspace_id.trim().is_empty() {
                return Err(ReportError::ConfigError(
                    "Live environment requires query.workspace_id".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.query.lookback_hours))
    }

    /// Query text to run: the configured override or the built-in aggregation
    pub fn query_text(&self) -> String {
        match &self.query.query_text {
            Some(text) => text.clone(),
            None => UsageQuery::new(self.lookback()).render(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn live_endpoints() -> LiveEndpoints {
        LiveEndpoints {
            log_query_url: "https://api.loganalytics.io".to_string(),
            blob_account_url: "https://acct.blob.core.windows.net".to_string(),
            ingestion_endpoint: "https://dce.ingest.monitor.azure.com".to_string(),
            ingestion_rule_id: "dcr-1".to_string(),
            ingestion_stream: "Custom-ChargebackFailures_CL".to_string(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = ReportConfig::default();
        assert_eq!(config.environment, ReportEnvironment::Mock);
        assert_eq!(config.query.lookback_hours, 24);
        assert_eq!(config.target.to_string(), "reportoutput/dailyChargeBackReport.csv");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_query_text_default_and_override() {
        let mut config = ReportConfig::default();
        assert!(config.query_text().contains("ago(24h)"));

        config.query.query_text = Some("Usage | take 10".to_string());
        assert_eq!(config.query_text(), "Usage | take 10");
    }

    #[test]
    fn test_live_requires_endpoints_and_workspace() {
        let mut config = ReportConfig {
            environment: ReportEnvironment::Live,
            ..ReportConfig::default()
        };
        assert!(config.validate().is_err());

        config.live = Some(live_endpoints());
        assert!(config.validate().is_err());

        config.query.workspace_id = "ws-1".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_lookback() {
        let mut config = ReportConfig::default();
        config.query.lookback_hours = 0;
        assert!(matches!(config.validate(), Err(ReportError::ConfigError(_))));
    }

    #[test]
    fn test_from_file_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"workflow_name": "chargeback-nightly", "query": {{"lookback_hours": 48}}}}"#
        )
        .unwrap();

        let config = ReportConfig::from_file(file.path()).unwrap();
        assert_eq!(config.workflow_name, "chargeback-nightly");
        assert_eq!(config.query.lookback_hours, 48);
        assert_eq!(config.timeouts, TimeoutConfig::default());
    }

    #[test]
    fn test_from_file_missing() {
        let err = ReportConfig::from_file("/nonexistent/chargeback.json").unwrap_err();
        assert!(matches!(err, ReportError::ConfigError(_)));
    }

    #[test]
    fn test_config_serialization() {
        let config = ReportConfig {
            live: Some(live_endpoints()),
            ..ReportConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: ReportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }
}
