//! Progress tracking with observed-duration ETA.

use std::time::Duration;

use tradewind_events::{ControlEvent, EventBus};

/// Publishes a progress event after every completed group and estimates
/// the remaining time from the average observed group duration.
///
/// Subscribers only observe; nothing here lets them reach back into the
/// run.
pub struct ProgressTracker {
    bus: EventBus,
    run_id: String,
    total_groups: usize,
    completed_groups: usize,
    observed: Vec<Duration>,
}

impl ProgressTracker {
    /// Creates a tracker for one run.
    pub fn new(bus: EventBus, run_id: impl Into<String>, total_groups: usize) -> Self {
        Self {
            bus,
            run_id: run_id.into(),
            total_groups,
            completed_groups: 0,
            observed: Vec::new(),
        }
    }

    /// Groups completed so far.
    pub fn completed_groups(&self) -> usize {
        self.completed_groups
    }

    /// Estimated remaining milliseconds, once at least one group has been
    /// observed.
    pub fn eta_ms(&self) -> Option<u64> {
        if self.observed.is_empty() {
            return None;
        }
        let total: Duration = self.observed.iter().sum();
        let avg = total / self.observed.len() as u32;
        let remaining = self.total_groups.saturating_sub(self.completed_groups) as u32;
        Some((avg * remaining).as_millis() as u64)
    }

    /// Records a completed group and publishes the progress event.
    /// `next` names the upcoming group's leading action and target.
    pub fn group_completed(&mut self, duration: Duration, next: Option<(&str, &str)>) {
        self.completed_groups += 1;
        self.observed.push(duration);
        self.bus.publish(ControlEvent::RollbackProgress {
            run_id: self.run_id.clone(),
            completed_groups: self.completed_groups,
            total_groups: self.total_groups,
            current_action: next.map(|(action, _)| action.to_string()),
            target: next.map(|(_, target)| target.to_string()),
            eta_ms: self.eta_ms(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_uses_average_observed_duration() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("test");
        let mut tracker = ProgressTracker::new(bus, "rb-1", 4);

        assert_eq!(tracker.eta_ms(), None);

        tracker.group_completed(Duration::from_millis(100), Some(("start-service", "a")));
        // Three groups remain at 100ms average.
        assert_eq!(tracker.eta_ms(), Some(300));

        tracker.group_completed(Duration::from_millis(300), None);
        // Average 200ms, two groups remain.
        assert_eq!(tracker.eta_ms(), Some(400));

        let first = sub.try_next().unwrap();
        match first {
            ControlEvent::RollbackProgress {
                completed_groups,
                total_groups,
                current_action,
                ..
            } => {
                assert_eq!(completed_groups, 1);
                assert_eq!(total_groups, 4);
                assert_eq!(current_action.as_deref(), Some("start-service"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
