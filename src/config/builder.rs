use super::{LiveEndpoints, QueryConfig, ReportConfig, ReportEnvironment, TimeoutConfig};
use crate::error::{ReportError, ReportResult};
use crate::logger::LogLevel;
use crate::types::BlobLocation;
use std::path::PathBuf;

/// Builder for constructing ReportConfig instances with a fluent API
///
/// # Example
/// ```
/// use chargeback_lib::config::{ReportConfigBuilder, ReportEnvironment};
///
/// let config = ReportConfigBuilder::new()
///     .workflow_name("daily-chargeback-report")
///     .environment(ReportEnvironment::Mock)
///     .lookback_hours(24)
///     .target("reportoutput", "dailyChargeBackReport.csv")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct ReportConfigBuilder {
    workflow_name: Option<String>,
    environment: ReportEnvironment,
    workspace_id: Option<String>,
    query_text: Option<String>,
    lookback_hours: Option<u32>,
    target: Option<BlobLocation>,
    timeouts: TimeoutConfig,
    live: Option<LiveEndpoints>,
    local_blob_root: Option<PathBuf>,
    log_level: LogLevel,
}

impl ReportConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            workflow_name: None,
            environment: ReportEnvironment::Mock,
            workspace_id: None,
            query_text: None,
            lookback_hours: None,
            target: None,
            timeouts: TimeoutConfig::default(),
            live: None,
            local_blob_root: None,
            log_level: LogLevel::Info,
        }
    }

    pub fn workflow_name(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = Some(name.into());
        self
    }

    pub fn environment(mut self, environment: ReportEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    /// Replace the built-in aggregation query
    pub fn query_text(mut self, text: impl Into<String>) -> Self {
        self.query_text = Some(text.into());
        self
    }

    pub fn lookback_hours(mut self, hours: u32) -> Self {
        self.lookback_hours = Some(hours);
        self
    }

    pub fn target(mut self, container: impl Into<String>, path: impl Into<String>) -> Self {
        self.target = Some(BlobLocation::new(container, path));
        self
    }

    pub fn query_timeout_secs(mut self, secs: u64) -> Self {
        self.timeouts.query_secs = secs;
        self
    }

    pub fn publish_timeout_secs(mut self, secs: u64) -> Self {
        self.timeouts.publish_secs = secs;
        self
    }

    pub fn report_timeout_secs(mut self, secs: u64) -> Self {
        self.timeouts.report_secs = secs;
        self
    }

    pub fn live_endpoints(mut self, endpoints: LiveEndpoints) -> Self {
        self.live = Some(endpoints);
        self
    }

    pub fn local_blob_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.local_blob_root = Some(root.into());
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Build the ReportConfig instance
    ///
    /// # Errors
    /// Returns `ReportError::BuilderError` if required fields are missing or invalid
    pub fn build(self) -> ReportResult<ReportConfig> {
        let defaults = ReportConfig::default();

        if self.environment == ReportEnvironment::Live {
            if self.live.is_none() {
                return Err(ReportError::BuilderError(
                    "live endpoints are required for the Live environment".to_string(),
                ));
            }
            if self.workspace_id.as_deref().map_or(true, |w| w.trim().is_empty()) {
                return Err(ReportError::BuilderError(
                    "workspace_id is required for the Live environment".to_string(),
                ));
            }
        }

        let config = ReportConfig {
            workflow_name: self.workflow_name.unwrap_or(defaults.workflow_name),
            environment: self.environment,
            query: QueryConfig {
                workspace_id: self.workspace_id.unwrap_or_default(),
                query_text: self.query_text,
                lookback_hours: self.lookback_hours.unwrap_or(defaults.query.lookback_hours),
            },
            target: self.target.unwrap_or(defaults.target),
            timeouts: self.timeouts,
            live: self.live,
            local_blob_root: self.local_blob_root,
            log_level: self.log_level,
        };

        config
            .validate()
            .map_err(|e| ReportError::BuilderError(e.to_string()))?;
        Ok(config)
    }
}

impl Default for ReportConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
