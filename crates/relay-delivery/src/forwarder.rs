//! Forwards validated records to the ingestion API with bounded retries.
//!
//! A forward makes at most `max_attempts` POSTs. An attempt succeeds when
//! the API answers 2xx; any other status, transport error, or serialization
//! error fails the attempt and the next one is made after the policy's
//! backoff delay. The forwarder keeps no state between records.

use std::sync::Arc;

use bytes::Bytes;
use relay_core::{Clock, TelemetryRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    client::{ClientConfig, IngestClient},
    error::{ErrorCategory, ForwardError, RelayError, Result},
    retry::RetryPolicy,
};

/// Configuration for the forwarder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Full URL records are POSTed to.
    pub endpoint: String,
    /// HTTP client configuration.
    pub client_config: ClientConfig,
    /// Attempt budget and backoff between attempts.
    pub retry_policy: RetryPolicy,
}

impl ForwarderConfig {
    /// Creates a configuration for `api_url` + `ingest_path` with default
    /// client and retry settings.
    pub fn new(api_url: &str, ingest_path: &str) -> Self {
        Self {
            endpoint: endpoint_url(api_url, ingest_path),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Joins the API base URL and the ingestion path with exactly one slash.
pub fn endpoint_url(api_url: &str, ingest_path: &str) -> String {
    format!("{}/{}", api_url.trim_end_matches('/'), ingest_path.trim_start_matches('/'))
}

/// Result of forwarding one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The API accepted the record.
    Delivered {
        /// Attempts made, including the successful one
        attempts: u32,
        /// 2xx status returned by the API
        status_code: u16,
    },
    /// Every attempt failed.
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: ForwardError,
    },
}

impl ForwardOutcome {
    /// Returns `true` if the record was accepted.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Returns the number of attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Sends records to the ingestion API.
#[derive(Debug)]
pub struct Forwarder {
    client: IngestClient,
    endpoint: String,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Forwarder {
    /// Creates a forwarder from its configuration.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Configuration` if the HTTP client cannot be
    /// built or the policy allows no attempts.
    pub fn new(config: ForwarderConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.retry_policy.max_attempts == 0 {
            return Err(RelayError::configuration("max_attempts must be at least 1"));
        }

        let client = IngestClient::new(config.client_config)
            .map_err(|e| RelayError::configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
            retry_policy: config.retry_policy,
            clock,
        })
    }

    /// Returns the URL records are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Forwards one record, retrying until success or the attempt budget is
    /// spent.
    pub async fn forward(&self, record: &TelemetryRecord) -> ForwardOutcome {
        let mut attempt = 1;

        loop {
            if attempt > 1 {
                let delay = self.retry_policy.delay_before(attempt);
                info!(
                    attempt,
                    max_attempts = self.retry_policy.max_attempts,
                    delay_ms = delay.as_millis(),
                    "waiting before next forward attempt"
                );
                self.clock.sleep(delay).await;
            }

            match self.attempt(record, attempt).await {
                Ok(status_code) => {
                    info!(attempt, status_code, location = %record.location, "record forwarded");
                    return ForwardOutcome::Delivered { attempts: attempt, status_code };
                },
                Err(error) => {
                    warn!(
                        attempt,
                        max_attempts = self.retry_policy.max_attempts,
                        error = %error,
                        error_category = %ErrorCategory::from(&error),
                        "forward attempt failed"
                    );

                    if !self.retry_policy.allows_attempt_after(attempt) {
                        return ForwardOutcome::Exhausted { attempts: attempt, last_error: error };
                    }
                },
            }

            attempt += 1;
        }
    }

    /// Makes a single attempt and returns the 2xx status on success.
    async fn attempt(
        &self,
        record: &TelemetryRecord,
        attempt: u32,
    ) -> std::result::Result<u16, ForwardError> {
        let body = record.to_json().map_err(|e| ForwardError::serialization(e.to_string()))?;

        let response = self.client.post_json(&self.endpoint, Bytes::from(body), attempt).await?;

        if response.is_success {
            Ok(response.status_code)
        } else {
            debug!(status = response.status_code, body = %response.body, "non-2xx response");
            Err(ForwardError::http_status(response.status_code, response.body))
        }
    }
}
