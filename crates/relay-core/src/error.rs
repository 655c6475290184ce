//! Error types for record decoding and validation.
//!
//! Both variants are message-level failures: a record that fails to decode
//! or validate can never succeed on redelivery.

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for record handling.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Message body is not a decodable telemetry record.
    #[error("decode error: {0}")]
    Decode(String),

    /// Record decoded but violates a semantic rule.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl CoreError {
    /// Returns `true` if the error came from decoding the raw body.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}
