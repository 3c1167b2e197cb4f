//! Shared, ordered record of what the doubles observed.

use parking_lot::Mutex;
use std::sync::Arc;

use coord_core::messages::MessageType;
use coord_core::HardState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Tick,
    Step(MessageType),
    ApplySnapshot(u64),
    SetHardState(HardState),
    /// Indices of the appended entries.
    Append(Vec<u64>),
    /// Indices of the applied entries and the restored snapshot index.
    Apply {
        entries: Vec<u64>,
        snapshot: Option<u64>,
    },
    Advance,
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Events other than ticks and steps, which arrive on timers.
    pub fn pipeline_events(&self) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|event| !matches!(event, Event::Tick | Event::Step(_)))
            .cloned()
            .collect()
    }

    pub fn contains(&self, event: &Event) -> bool {
        self.events.lock().contains(event)
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }
}
