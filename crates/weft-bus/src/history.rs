//! Bounded, append-ordered publish history.

use std::collections::VecDeque;
use std::sync::RwLock;

use weft_core::types::Event;
use weft_core::StoreError;

const DEFAULT_MAX_HISTORY: usize = 1_000;

/// In-memory history of past publishes.
///
/// Every publish is appended before handler invocation begins, so a handler
/// that itself publishes observes a consistent causal history. The buffer is
/// bounded; the oldest entries are dropped once the limit is reached.
pub struct EventHistory {
    events: RwLock<VecDeque<Event>>,
    max_size: usize,
}

impl EventHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_size: max_size.max(1),
        }
    }

    pub fn append(&self, event: Event) -> Result<(), StoreError> {
        let mut events = self
            .events
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if events.len() >= self.max_size {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    /// Append-ordered snapshot, optionally filtered by event type.
    pub fn snapshot(&self, event_type: Option<&str>) -> Result<Vec<Event>, StoreError> {
        let events = self
            .events
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(events
            .iter()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .cloned()
            .collect())
    }

    /// Seed history from previously persisted events, oldest first.
    pub fn replay(&self, events: Vec<Event>) -> Result<(), StoreError> {
        for event in events {
            self.append(event)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let mut events = self
            .events
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        events.clear();
        Ok(())
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}
