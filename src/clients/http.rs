//! Live HTTP adapters
//!
//! - [`HttpLogStore`]: log analytics query API
//! - [`HttpBlobStore`]: block blob REST API (single-shot upload)
//! - [`HttpFailureSink`]: logs ingestion API (data collection rule stream)
//!
//! All three authenticate with a bearer token handed in at construction.

use super::{BlobStore, FailureSink, LogStore, QueryRequest, QueryTable};
use crate::error::{ReportResult, StageFailure};
use crate::types::{BlobLocation, FailureEvent, StageStatus};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

/// Storage REST API version sent with blob requests
pub const BLOB_API_VERSION: &str = "2021-08-06";

/// Logs ingestion API version
pub const INGESTION_API_VERSION: &str = "2023-01-01";

/// Parse a base URL, making sure it ends with `/` so relative joins append
fn base_url(raw: &str) -> ReportResult<Url> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Map a transport error to a stage failure
fn transport_failure(err: reqwest::Error) -> StageFailure {
    if err.is_timeout() {
        StageFailure::timed_out(err.to_string())
    } else if err.is_connect() {
        StageFailure::failed("ServiceUnavailable", err.to_string())
    } else {
        StageFailure::failed("RequestFailed", err.to_string())
    }
}

/// Map a non-success HTTP response to a stage failure
///
/// `service_code` is the error code reported in the response body, if any.
fn status_failure(status: StatusCode, service_code: Option<String>, message: String) -> StageFailure {
    let default_code = match status {
        StatusCode::BAD_REQUEST => "BadQuery",
        StatusCode::UNAUTHORIZED => "Unauthorized",
        StatusCode::FORBIDDEN => "AuthorizationFailure",
        StatusCode::NOT_FOUND => "NotFound",
        StatusCode::TOO_MANY_REQUESTS => "TooManyRequests",
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => "GatewayTimeout",
        _ => "HttpError",
    };
    let code = service_code.unwrap_or_else(|| default_code.to_string());
    let message = if message.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, message)
    };

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            StageFailure::new(StageStatus::TimedOut, code, message)
        }
        _ => StageFailure::failed(code, message),
    }
}

#[derive(Deserialize)]
struct JsonErrorBody {
    error: JsonErrorDetail,
}

#[derive(Deserialize)]
struct JsonErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

/// Read the body of a failed JSON API response into a stage failure
async fn json_error(response: reqwest::Response) -> StageFailure {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<JsonErrorBody>(&body) {
        Ok(parsed) => status_failure(
            status,
            parsed.error.code,
            parsed.error.message.unwrap_or_default(),
        ),
        Err(_) => status_failure(status, None, body),
    }
}

/// Extract the text of `<tag>` from a storage XML error body
fn xml_element(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim().to_string())
}

/// Read the body of a failed storage response into a stage failure
async fn xml_error(response: reqwest::Response) -> StageFailure {
    let status = response.status();
    let header_code = response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    let code = header_code.or_else(|| xml_element(&body, "Code"));
    let message = xml_element(&body, "Message").unwrap_or_default();
    status_failure(status, code, message)
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    tables: Vec<QueryTable>,
    /// Set alongside `tables` when the service returned a partial result
    #[serde(default)]
    error: Option<JsonErrorDetail>,
}

/// Log analytics query client
pub struct HttpLogStore {
    client: Client,
    endpoint: Url,
    token: String,
}

impl HttpLogStore {
    pub fn new(client: Client, endpoint: &str, token: impl Into<String>) -> ReportResult<Self> {
        Ok(Self {
            client,
            endpoint: base_url(endpoint)?,
            token: token.into(),
        })
    }

    fn query_url(&self, workspace_id: &str) -> Result<Url, StageFailure> {
        self.endpoint
            .join(&format!("v1/workspaces/{}/query", workspace_id))
            .map_err(|e| StageFailure::failed("InvalidRequest", e.to_string()))
    }
}

#[async_trait]
impl LogStore for HttpLogStore {
    async fn query(&self, request: &QueryRequest) -> Result<QueryTable, StageFailure> {
        let url = self.query_url(&request.workspace_id)?;
        debug!(target: "clients::http", %url, timespan = %request.timespan(), "Posting usage query");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({
                "query": request.query,
                "timespan": request.timespan(),
            }))
            .send()
            .await
            .map_err(transport_failure)?;

        if !response.status().is_success() {
            return Err(json_error(response).await);
        }

        let body: QueryResponse = response.json().await.map_err(|e| {
            StageFailure::failed("InvalidResponse", format!("Malformed query response: {}", e))
        })?;

        if let Some(error) = body.error {
            return Err(StageFailure::failed(
                error.code.unwrap_or_else(|| "PartialError".to_string()),
                error
                    .message
                    .unwrap_or_else(|| "Query returned a partial result".to_string()),
            ));
        }

        body.tables
            .into_iter()
            .next()
            .ok_or_else(|| StageFailure::failed("InvalidResponse", "Query returned no tables"))
    }
}

/// Block blob client
pub struct HttpBlobStore {
    client: Client,
    account_url: Url,
    token: String,
}

impl HttpBlobStore {
    pub fn new(client: Client, account_url: &str, token: impl Into<String>) -> ReportResult<Self> {
        Ok(Self {
            client,
            account_url: base_url(account_url)?,
            token: token.into(),
        })
    }

    fn blob_url(&self, location: &BlobLocation) -> Result<Url, StageFailure> {
        let mut url = self.account_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StageFailure::failed("InvalidRequest", "Account URL cannot be a base"))?;
            segments.pop_if_empty().push(&location.container);
            for part in location.path.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, location: &BlobLocation, payload: Vec<u8>) -> Result<(), StageFailure> {
        let url = self.blob_url(location)?;
        debug!(target: "clients::http", %url, bytes = payload.len(), "Uploading blob");

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", BLOB_API_VERSION)
            .header(reqwest::header::CONTENT_TYPE, "text/csv; charset=utf-8")
            .body(payload)
            .send()
            .await
            .map_err(transport_failure)?;

        if !response.status().is_success() {
            return Err(xml_error(response).await);
        }
        Ok(())
    }

    async fn get(&self, location: &BlobLocation) -> Result<Option<Vec<u8>>, StageFailure> {
        let url = self.blob_url(location)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("x-ms-version", BLOB_API_VERSION)
            .send()
            .await
            .map_err(transport_failure)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(xml_error(response).await);
        }

        let bytes = response.bytes().await.map_err(transport_failure)?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Logs ingestion client for failure events
pub struct HttpFailureSink {
    client: Client,
    endpoint: Url,
    rule_id: String,
    stream_name: String,
    token: String,
}

impl HttpFailureSink {
    pub fn new(
        client: Client,
        endpoint: &str,
        rule_id: impl Into<String>,
        stream_name: impl Into<String>,
        token: impl Into<String>,
    ) -> ReportResult<Self> {
        Ok(Self {
            client,
            endpoint: base_url(endpoint)?,
            rule_id: rule_id.into(),
            stream_name: stream_name.into(),
            token: token.into(),
        })
    }

    fn stream_url(&self) -> Result<Url, StageFailure> {
        let mut url = self
            .endpoint
            .join(&format!(
                "dataCollectionRules/{}/streams/{}",
                self.rule_id, self.stream_name
            ))
            .map_err(|e| StageFailure::failed("InvalidRequest", e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("api-version", INGESTION_API_VERSION);
        Ok(url)
    }
}

#[async_trait]
impl FailureSink for HttpFailureSink {
    async fn ingest(&self, event: &FailureEvent) -> Result<(), StageFailure> {
        let url = self.stream_url()?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&[event])
            .send()
            .await
            .map_err(transport_failure)?;

        if !response.status().is_success() {
            return Err(json_error(response).await);
        }
        Ok(())
    }
}
