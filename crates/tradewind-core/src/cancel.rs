//! Graceful-cancellation budget enforcement.
//!
//! After a cancellation signal is delivered, the operation must wind down
//! within a configured budget. Operations that do not are abandoned and
//! reported as force-abandoned, which is always fatal to the enclosing
//! operation.

use std::future::Future;
use std::time::Duration;

use tracing::error;

/// Outcome of waiting for a cancelled operation to wind down.
#[derive(Debug)]
pub enum GracefulOutcome<T> {
    /// The operation finished (successfully or not) within the budget.
    Completed(T),
    /// The operation exceeded the budget and was abandoned.
    ForceAbandoned,
}

impl<T> GracefulOutcome<T> {
    /// Whether the operation had to be abandoned.
    pub fn was_abandoned(&self) -> bool {
        matches!(self, GracefulOutcome::ForceAbandoned)
    }
}

/// Awaits `winding_down` for at most `budget`.
///
/// Call this after signalling cancellation: the future is given the budget
/// to observe the signal and finish its current atomic step. On timeout the
/// future is dropped and the caller must treat the operation as
/// force-abandoned.
pub async fn with_graceful_budget<T>(
    operation: &str,
    budget: Duration,
    winding_down: impl Future<Output = T>,
) -> GracefulOutcome<T> {
    match tokio::time::timeout(budget, winding_down).await {
        Ok(value) => GracefulOutcome::Completed(value),
        Err(_) => {
            error!(
                operation,
                budget_ms = budget.as_millis() as u64,
                "cancelled operation exceeded graceful budget, abandoning"
            );
            GracefulOutcome::ForceAbandoned
        }
    }
}
