use super::{
    BlobStore, FailureSink, FileBlobStore, HttpBlobStore, HttpFailureSink, HttpLogStore,
    InMemoryBlobStore, InMemoryLogStore, LogStore, RecordingFailureSink,
};
use crate::config::{ReportConfig, ReportEnvironment};
use crate::error::{ReportError, ReportResult};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// The three clients a pipeline run needs
#[derive(Clone)]
pub struct Clients {
    pub log_store: Arc<dyn LogStore>,
    pub blob_store: Arc<dyn BlobStore>,
    pub failure_sink: Arc<dyn FailureSink>,
}

/// Factory for creating client instances
///
/// Picks the implementations that match the configured environment. Live
/// clients need an access token; it is passed in rather than read from the
/// configuration.
pub struct ClientFactory;

impl ClientFactory {
    /// Create clients from configuration
    ///
    /// # Errors
    /// Returns an error if:
    /// - The environment is `Live` and no token is supplied
    /// - Live endpoints are missing or malformed
    /// - The HTTP client cannot be built
    pub fn create(config: &ReportConfig, access_token: Option<&str>) -> ReportResult<Clients> {
        match config.environment {
            ReportEnvironment::Mock => Ok(Self::mock(config)),
            ReportEnvironment::Live => {
                let token = access_token
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| {
                        ReportError::ConfigError(
                            "An access token is required for the Live environment".to_string(),
                        )
                    })?;
                Self::live(config, token)
            }
        }
    }

    fn mock(config: &ReportConfig) -> Clients {
        let blob_store: Arc<dyn BlobStore> = match &config.local_blob_root {
            Some(root) => Arc::new(FileBlobStore::new(root.clone())),
            None => Arc::new(InMemoryBlobStore::new()),
        };

        Clients {
            log_store: Arc::new(InMemoryLogStore::new()),
            blob_store,
            failure_sink: Arc::new(RecordingFailureSink::new()),
        }
    }

    fn live(config: &ReportConfig, token: &str) -> ReportResult<Clients> {
        let endpoints = config.live.as_ref().ok_or_else(|| {
            ReportError::ConfigError("Live environment requires live endpoints".to_string())
        })?;

        Ok(Clients {
            log_store: Arc::new(HttpLogStore::new(
                Self::http_client(config.timeouts.query())?,
                &endpoints.log_query_url,
                token,
            )?),
            blob_store: Arc::new(HttpBlobStore::new(
                Self::http_client(config.timeouts.publish())?,
                &endpoints.blob_account_url,
                token,
            )?),
            failure_sink: Arc::new(HttpFailureSink::new(
                Self::http_client(config.timeouts.report())?,
                &endpoints.ingestion_endpoint,
                &endpoints.ingestion_rule_id,
                &endpoints.ingestion_stream,
                token,
            )?),
        })
    }

    fn http_client(timeout: Duration) -> ReportResult<Client> {
        Ok(Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chargeback/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }
}
