//! Retry policy: how many times a stage may ask for a retry, and how long to
//! wait before each re-dispatch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay between a `Retry` outcome and the next dispatch of the same task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed {
        delay_ms: u64,
    },

    /// `base_ms * multiplier^(retry - 1)`, capped at `max_delay_ms`.
    Exponential {
        base_ms: u64,
        multiplier: f64,
        max_delay_ms: u64,
    },
}

/// Retry bound and backoff.
///
/// No `Default`: callers state `max_retries` and
/// `backoff` explicitly, in code or in the `[retry]` config table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// A task is re-dispatched while `retry_count <= max_retries`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::new(
            max_retries,
            Backoff::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
        )
    }

    pub fn exponential(max_retries: u32, base: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self::new(
            max_retries,
            Backoff::Exponential {
                base_ms: base.as_millis() as u64,
                multiplier,
                max_delay_ms: max_delay.as_millis() as u64,
            },
        )
    }

    /// Delay before re-dispatch number `retry` (1-indexed: the first retry is 1).
    pub fn next_delay(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential {
                base_ms,
                multiplier,
                max_delay_ms,
            } => {
                let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
                let delay_ms = base_ms as f64 * multiplier.powi(exponent);
                let capped = if delay_ms.is_finite() {
                    delay_ms.min(max_delay_ms as f64)
                } else {
                    max_delay_ms as f64
                };
                Duration::from_millis(capped.max(0.0) as u64)
            }
        }
    }
}
