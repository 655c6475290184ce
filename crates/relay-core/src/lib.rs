//! Core telemetry types shared by the relay pipeline.
//!
//! Provides the telemetry record model with its wire decoding, the semantic
//! validation rules applied before forwarding, error types, and the clock
//! abstraction used to make backoff and reconnect waits testable.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;
pub mod validation;

pub use error::{CoreError, Result};
pub use models::TelemetryRecord;
pub use time::{Clock, RealClock, TestClock};
pub use validation::{validate, ValidationError};
