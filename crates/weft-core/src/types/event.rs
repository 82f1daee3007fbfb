//! Event - the immutable unit of communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SYSTEM_SOURCE;

/// An event published through the bus.
///
/// Events are immutable once created. `event_type` is a dot-hierarchical
/// name such as `tools.now` or `task.schedule`; `data` is always a JSON
/// object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this publish.
    pub id: uuid::Uuid,
    /// Dot-hierarchical event type, e.g. `user.notify`.
    pub event_type: String,
    /// Event payload (JSON object).
    pub data: Value,
    /// Origin of the event (`system`, `chain`, `hook`, `scheduler`, ...).
    pub source: String,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event with the default `system` source.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self::with_source(event_type, data, SYSTEM_SOURCE)
    }

    /// Create a new event with an explicit source.
    pub fn with_source(
        event_type: impl Into<String>,
        data: Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this event originated from a hook chain.
    pub fn is_hook_originated(&self) -> bool {
        self.source == super::HOOK_SOURCE
    }
}
