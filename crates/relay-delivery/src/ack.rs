//! Maps the outcome of processing one delivery to a broker settlement.
//!
//! | Decode | Validate | Forward   | Decision              |
//! |--------|----------|-----------|-----------------------|
//! | fail   | -        | -         | reject, no requeue    |
//! | ok     | fail     | -         | reject, no requeue    |
//! | ok     | ok       | success   | acknowledge           |
//! | ok     | ok       | exhausted | reject, with requeue  |
//!
//! Malformed and invalid records are dropped because redelivery would fail
//! the same way. Forward failures are assumed transient and go back to the
//! queue.

use std::fmt;

use relay_core::ValidationError;

use crate::forwarder::ForwardOutcome;

/// What happened to one delivery before settlement.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    /// The body could not be decoded into a record.
    DecodeFailed {
        /// Decoder error message
        reason: String,
    },
    /// The record decoded but broke a validation rule.
    ValidationFailed(ValidationError),
    /// The record was valid and forwarding ran to completion.
    Forwarded(ForwardOutcome),
}

/// Settlement sent back to the broker for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Delivery fully handled; never redelivered.
    Acknowledge,
    /// Delivery failed; `requeue` controls whether the broker offers it
    /// again or discards it.
    Reject {
        /// Return the message to the queue
        requeue: bool,
    },
}

impl AckDecision {
    /// Reject without requeue.
    pub const DISCARD: Self = Self::Reject { requeue: false };

    /// Reject with requeue.
    pub const REQUEUE: Self = Self::Reject { requeue: true };
}

impl fmt::Display for AckDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledge => write!(f, "ack"),
            Self::Reject { requeue: false } => write!(f, "reject"),
            Self::Reject { requeue: true } => write!(f, "requeue"),
        }
    }
}

/// Applies the decision table.
pub fn decide(outcome: &ProcessingOutcome) -> AckDecision {
    match outcome {
        ProcessingOutcome::DecodeFailed { .. } | ProcessingOutcome::ValidationFailed(_) => {
            AckDecision::DISCARD
        },
        ProcessingOutcome::Forwarded(forward) if forward.is_success() => AckDecision::Acknowledge,
        ProcessingOutcome::Forwarded(_) => AckDecision::REQUEUE,
    }
}

impl From<&ProcessingOutcome> for AckDecision {
    fn from(outcome: &ProcessingOutcome) -> Self {
        decide(outcome)
    }
}
