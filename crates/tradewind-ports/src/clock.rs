//! Clock port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Cancellable wall-clock access.
///
/// Components never call `Utc::now()` or sleep directly; routing time
/// through the port keeps schedulers and deadline math testable.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock instant.
    fn now(&self) -> DateTime<Utc>;

    /// Suspends until `deadline` or until `cancel` fires, whichever comes
    /// first. Returns `true` when the deadline was reached, `false` on
    /// cancellation. A deadline in the past returns immediately.
    async fn sleep_until(&self, deadline: DateTime<Utc>, cancel: &CancellationToken) -> bool;
}

/// Clock backed by the system time and the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>, cancel: &CancellationToken) -> bool {
        let now = Utc::now();
        let remaining = match (deadline - now).to_std() {
            Ok(d) => d,
            Err(_) => return true,
        };
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(remaining) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn sleeps_to_deadline() {
        let clock = SystemClock;
        let cancel = CancellationToken::new();
        let deadline = clock.now() + chrono::Duration::seconds(30);
        assert!(clock.sleep_until(deadline, &cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins() {
        let clock = SystemClock;
        let cancel = CancellationToken::new();
        let deadline = clock.now() + chrono::Duration::hours(2);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        assert!(!clock.sleep_until(deadline, &cancel).await);
    }

    #[tokio::test]
    async fn past_deadline_returns_immediately() {
        let clock = SystemClock;
        let cancel = CancellationToken::new();
        let deadline = clock.now() - chrono::Duration::seconds(5);
        assert!(clock.sleep_until(deadline, &cancel).await);
    }
}
