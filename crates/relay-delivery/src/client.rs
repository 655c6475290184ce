//! HTTP client for the ingestion API.
//!
//! Sends one JSON body per call and categorizes transport failures. Status
//! interpretation is left to the caller: any HTTP response, including 4xx
//! and 5xx, is returned as `Ok`.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::ForwardError;

/// Upper bound on response body bytes kept for logging.
const MAX_LOGGED_BODY_SIZE: usize = 1024;

/// Configuration for the ingestion client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout applied to each request independently.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: concat!("telemetry-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP client reused across forward attempts.
///
/// Wraps a pooled `reqwest::Client`; safe to share and reuse sequentially.
#[derive(Debug, Clone)]
pub struct IngestClient {
    client: reqwest::Client,
    config: ClientConfig,
}

/// Response from one ingestion request.
#[derive(Debug, Clone)]
pub struct IngestResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated for logging.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the status is in [200, 300).
    pub is_success: bool,
}

impl IngestClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn new(config: ClientConfig) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ForwardError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Creates a new client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn with_defaults() -> Result<Self, ForwardError> {
        Self::new(ClientConfig::default())
    }

    /// POSTs a JSON body to `url`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the per-request timeout elapses and
    /// `NetworkError` for connection refused, DNS and other transport
    /// failures. HTTP error statuses are not errors at this layer.
    pub async fn post_json(
        &self,
        url: &str,
        body: Bytes,
        attempt: u32,
    ) -> Result<IngestResponse, ForwardError> {
        let start_time = Instant::now();
        let span = info_span!("ingest_request", url = %url, attempt);

        async move {
            tracing::debug!(bytes = body.len(), "sending record to ingestion API");

            let response = match self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    if e.is_timeout() {
                        return Err(ForwardError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(ForwardError::network(format!("connection failed: {e}")));
                    }
                    return Err(ForwardError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let ingest_response = parse_response(response, duration).await;

            tracing::debug!(
                status = ingest_response.status_code,
                duration_ms = duration.as_millis(),
                "received response"
            );

            Ok(ingest_response)
        }
        .instrument(span)
        .await
    }
}

/// Reads status and a bounded slice of the body from a response.
async fn parse_response(response: Response, duration: Duration) -> IngestResponse {
    let status_code = response.status().as_u16();
    let is_success = response.status().is_success();

    let body = match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_LOGGED_BODY_SIZE => {
            let truncated = String::from_utf8_lossy(&bytes[..MAX_LOGGED_BODY_SIZE]);
            format!("{truncated}... (truncated)")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!("failed to read response body: {}", e);
            format!("[failed to read response body: {e}]")
        },
    };

    IngestResponse { status_code, body, duration, is_success }
}
