//! Uniform retry policy shared by every subsystem.
//!
//! Per-component ad-hoc retry loops are consolidated here: callers declare
//! attempts, initial delay and backoff factor, hand over a cancellation
//! token and a recoverability predicate, and get back either the first
//! success or a classified failure.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Declarative retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. `1` disables
    /// retrying.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry. `1.0` keeps the
    /// delay fixed.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            backoff_factor: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy: `max_attempts` tries, `delay` between each.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            backoff_factor: 1.0,
        }
    }

    /// Exponential policy starting at `initial_delay`.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_factor,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to wait before the retry that would become attempt
    /// `next_attempt` (1-based). `None` once attempts are exhausted.
    pub fn delay_before(&self, next_attempt: u32) -> Option<Duration> {
        if next_attempt <= 1 || next_attempt > self.max_attempts {
            return None;
        }
        let exponent = (next_attempt - 2) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        Some(Duration::from_millis(millis as u64))
    }
}

/// Failure of a retried operation.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The cancellation token fired between attempts.
    Cancelled,
    /// All attempts failed; carries the final error.
    Exhausted {
        /// Number of attempts actually made.
        attempts: u32,
        /// The error from the last attempt.
        last: E,
    },
    /// The first non-recoverable error, reported without further attempts.
    Fatal(E),
}

impl<E> RetryError<E> {
    /// Unwraps the underlying error when one exists.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Fatal(e) => Some(e),
        }
    }
}

/// Runs `op` under `policy`, retrying failures that satisfy
/// `is_recoverable` until attempts are exhausted or `cancel` fires.
///
/// The attempt number (1-based) is passed to `op` so callers can log it.
/// Cancellation is only observed between attempts; an in-flight attempt is
/// allowed to finish its current step, matching the cooperative model used
/// across the control plane.
pub async fn retry_with<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_recoverable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !is_recoverable(&err) => return Err(RetryError::Fatal(err)),
            Err(err) => match policy.delay_before(attempt + 1) {
                Some(delay) => {
                    warn!(attempt, error = %err, retry_in_ms = delay.as_millis() as u64, "attempt failed, retrying");
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    })
                }
            },
        }
    }
}
