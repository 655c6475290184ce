//! Backoff policy for forward attempts.
//!
//! The forwarder makes up to `max_attempts` HTTP attempts for one record and
//! waits before every attempt after the first. With the default linear
//! strategy the wait before attempt `k` is `k * base_delay`, so with a 2s
//! base the schedule is: attempt 1 immediately, attempt 2 after 4s,
//! attempt 3 after 6s.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration for forwarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    pub max_attempts: u32,

    /// Base delay the strategy scales.
    pub base_delay: Duration,

    /// Maximum delay before any single attempt.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,

    /// Strategy for calculating backoff delays.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            backoff_strategy: BackoffStrategy::Linear,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay before attempt `k` is `k * base_delay`.
    Linear,
    /// Delay doubles with each attempt.
    Exponential,
}

impl RetryPolicy {
    /// Returns the wait before the given 1-based attempt.
    ///
    /// The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let exponent = (attempt - 1).min(20);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };

        let capped_delay = std::cmp::min(delay, self.max_delay);
        let jittered_delay = apply_jitter(capped_delay, self.jitter_factor);

        std::cmp::min(jittered_delay, self.max_delay)
    }

    /// Returns `true` if another attempt is allowed after `attempt`.
    pub fn allows_attempt_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Applies jitter to a duration so restarted relays do not retry in lockstep.
///
/// Randomizes the delay by ±jitter_factor percentage. With a factor of 0.0
/// the delay is returned unchanged.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
