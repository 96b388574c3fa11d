//! Bounded in-memory journal of recent control events.
//!
//! The journal is just another subscriber: it never blocks producers, and
//! when it falls behind the dropped-event accounting on the bus covers it
//! like anyone else. Operators read it through the status surfaces.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::event::ControlEvent;

/// One journaled event with its observation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the journal observed the event.
    pub observed_at: DateTime<Utc>,
    /// The event itself.
    pub event: ControlEvent,
}

/// Ring buffer of the most recent events on a bus.
pub struct EventJournal {
    entries: Arc<Mutex<VecDeque<JournalEntry>>>,
    task: JoinHandle<()>,
}

impl EventJournal {
    /// Attaches a journal keeping the last `capacity` events.
    pub fn attach(bus: &EventBus, capacity: usize) -> Self {
        let entries: Arc<Mutex<VecDeque<JournalEntry>>> =
            Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let mut stream = bus.subscribe("event-journal");
        let sink = entries.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let mut buffer = sink.lock();
                if buffer.len() == capacity {
                    buffer.pop_front();
                }
                buffer.push_back(JournalEntry {
                    observed_at: Utc::now(),
                    event,
                });
            }
        });
        Self { entries, task }
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        let buffer = self.entries.lock();
        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// Entries currently retained.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the journal has observed nothing yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for EventJournal {
    fn drop(&mut self) {
        self.task.abort();
    }
}
