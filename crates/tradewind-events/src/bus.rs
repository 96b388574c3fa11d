//! Broadcast bus carrying [`ControlEvent`]s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::event::ControlEvent;

/// Default per-subscriber buffer capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Multi-producer, multi-consumer event bus.
///
/// Publishing never blocks. Each subscriber owns a bounded buffer; a
/// subscriber that falls more than the capacity behind loses the oldest
/// events, and every loss is counted on the bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ControlEvent>,
    dropped: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publishes an event to every current subscriber. Returns the number
    /// of subscribers that will observe it.
    pub fn publish(&self, event: ControlEvent) -> usize {
        debug!(event = event.label(), "publishing control event");
        // send only errs when there are no receivers, which is fine.
        self.sender.send(event).unwrap_or(0)
    }

    /// Opens a named subscription.
    pub fn subscribe(&self, name: impl Into<String>) -> EventStream {
        EventStream {
            name: name.into(),
            receiver: self.sender.subscribe(),
            dropped: self.dropped.clone(),
        }
    }

    /// Total events dropped across all subscribers since creation.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One subscriber's view of the bus.
pub struct EventStream {
    name: String,
    receiver: broadcast::Receiver<ControlEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Subscriber name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the next event. Lagged stretches are skipped (the missed
    /// count is recorded on the bus) and `None` means the bus is gone.
    pub async fn next(&mut self) -> Option<ControlEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.dropped.fetch_add(missed, Ordering::Relaxed);
                    warn!(
                        subscriber = %self.name,
                        missed,
                        "subscriber lagged, events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`EventStream::next`].
    pub fn try_next(&mut self) -> Option<ControlEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    self.dropped.fetch_add(missed, Ordering::Relaxed);
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version_event(n: usize) -> ControlEvent {
        ControlEvent::VersionCreated {
            version_id: format!("v-{n}"),
            version: format!("1.0.{n}"),
        }
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe("a");
        let mut b = bus.subscribe("b");

        assert_eq!(bus.publish(version_event(1)), 2);

        assert!(matches!(
            a.next().await,
            Some(ControlEvent::VersionCreated { .. })
        ));
        assert!(matches!(
            b.next().await,
            Some(ControlEvent::VersionCreated { .. })
        ));
    }

    #[tokio::test]
    async fn slow_subscriber_drops_with_counter() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe("slow");

        for n in 0..20 {
            bus.publish(version_event(n));
        }

        // The subscriber lost the oldest events but still makes progress.
        let mut received = 0;
        while slow.try_next().is_some() {
            received += 1;
        }
        assert!(received <= 4);
        assert!(bus.dropped_events() >= 16);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_block() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(version_event(0)), 0);
    }
}
