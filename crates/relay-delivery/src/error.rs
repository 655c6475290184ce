//! Error types for forwarding and broker operations.
//!
//! `ForwardError` covers a single failed HTTP attempt and never escapes the
//! forwarder: it is folded into a retry or a requeue decision.
//! `RelayError` covers connectivity problems, which are the only errors
//! that travel up to the supervisor and trigger a pipeline restart.

use std::fmt;

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Failure of one forward attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Ingestion API answered with a status outside 2xx.
    #[error("ingestion API returned HTTP {status_code}")]
    HttpStatus {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Record could not be serialized into a request body.
    #[error("failed to serialize record: {message}")]
    Serialization {
        /// Serializer error message
        message: String,
    },

    /// Invalid client or endpoint configuration.
    #[error("invalid forwarder configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },
}

impl ForwardError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an error from a non-2xx HTTP response.
    pub fn http_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus { status_code, body: body.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Returns the HTTP status if the API responded at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

/// Category of forward error for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx) and other unexpected statuses.
    Server,
    /// Serialization problems.
    Serialization,
    /// Configuration problems.
    Configuration,
}

impl From<&ForwardError> for ErrorCategory {
    fn from(error: &ForwardError) -> Self {
        match error {
            ForwardError::NetworkError { .. } | ForwardError::Timeout { .. } => Self::Network,
            ForwardError::HttpStatus { status_code: 400..=499, .. } => Self::Client,
            ForwardError::HttpStatus { .. } => Self::Server,
            ForwardError::Serialization { .. } => Self::Serialization,
            ForwardError::ConfigurationError { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Serialization => write!(f, "serialization"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Connectivity and lifecycle errors that end a pipeline session.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// Could not connect to the broker.
    #[error("broker connection failed: {message}")]
    Connection {
        /// Error message from the broker client
        message: String,
    },

    /// Channel setup or delivery stream failure.
    #[error("broker channel error: {message}")]
    Channel {
        /// Error message from the broker client
        message: String,
    },

    /// Sending an acknowledgement decision failed.
    #[error("failed to settle delivery {delivery_tag}: {message}")]
    Acknowledgement {
        /// Broker delivery tag of the unsettled message
        delivery_tag: u64,
        /// Error message from the broker client
        message: String,
    },

    /// The consumer task panicked or was aborted.
    #[error("consumer task failed: {message}")]
    Worker {
        /// Join error message
        message: String,
    },

    /// Bounded restart policy gave up.
    #[error("pipeline failed {failures} consecutive times, giving up")]
    RestartsExhausted {
        /// Number of consecutive failed sessions
        failures: u32,
    },

    /// Invalid relay configuration.
    #[error("invalid relay configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl RelayError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Creates a channel error.
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel { message: message.into() }
    }

    /// Creates an acknowledgement error.
    pub fn acknowledgement(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Acknowledgement { delivery_tag, message: message.into() }
    }

    /// Creates a worker error.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker { message: message.into() }
    }

    /// Creates a restarts exhausted error.
    pub fn restarts_exhausted(failures: u32) -> Self {
        Self::RestartsExhausted { failures }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}
