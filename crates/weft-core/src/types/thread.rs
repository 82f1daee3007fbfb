//! Thread - persistent conversational context.
//!
//! A thread is the append-only record of one conversation or workflow.
//! While a chain executes against it, the interpreter owns it exclusively;
//! between executions it is passive persisted state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Type alias for thread identifiers.
pub type ThreadId = String;

/// Lifecycle status of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Waiting,
    Completed,
    Archived,
}

impl ThreadStatus {
    /// Terminal statuses accept no further chain executions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ThreadStatus::Completed | ThreadStatus::Archived)
    }
}

/// One appended `{event, result}` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    /// Event type that produced this record.
    pub event: String,
    /// Resolved parameters the step was executed with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Aggregated handler result.
    pub result: Value,
    /// Failure detail when the step did not complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// When the record was appended.
    pub timestamp: DateTime<Utc>,
}

impl ThreadRecord {
    pub fn new(event: impl Into<String>, result: Value) -> Self {
        Self {
            event: event.into(),
            params: None,
            result,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// A failure marker record.
    pub fn failure(event: impl Into<String>, error: Value) -> Self {
        Self {
            event: event.into(),
            params: None,
            result: Value::Null,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Persistent conversational context with an append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub status: ThreadStatus,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append-only; no record is ever mutated or removed once appended.
    #[serde(default)]
    pub events: Vec<ThreadRecord>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Thread {
    /// Create a new thread with a generated id.
    pub fn new(summary: impl Into<String>) -> Self {
        let short = uuid::Uuid::new_v4().simple().to_string();
        Self::with_id(format!("thread_{}", &short[..12]), summary)
    }

    /// Create a new thread with a specific id.
    pub fn with_id(id: impl Into<ThreadId>, summary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: ThreadStatus::Active,
            summary: summary.into(),
            created_at: now,
            updated_at: now,
            events: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Append a record and bump `updated_at`. This is the only mutation the
    /// event log supports.
    pub fn push_record(&mut self, record: ThreadRecord) {
        self.events.push(record);
        self.updated_at = Utc::now();
    }

    /// Most recent record for an event type, if any.
    pub fn last_record(&self, event_type: &str) -> Option<&ThreadRecord> {
        self.events.iter().rev().find(|r| r.event == event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_record_appends_and_touches() {
        let mut thread = Thread::with_id("t1", "test thread");
        let before = thread.updated_at;

        thread.push_record(ThreadRecord::new("tools.now", json!({"iso": "2026-01-01"})));
        assert_eq!(thread.events.len(), 1);
        assert!(thread.updated_at >= before);
    }

    #[test]
    fn test_last_record_returns_most_recent_occurrence() {
        let mut thread = Thread::with_id("t1", "test thread");
        thread.push_record(ThreadRecord::new("tools.now", json!({"n": 1})));
        thread.push_record(ThreadRecord::new("other.step", json!({})));
        thread.push_record(ThreadRecord::new("tools.now", json!({"n": 2})));

        let last = thread.last_record("tools.now").unwrap();
        assert_eq!(last.result["n"], 2);
        assert!(thread.last_record("missing.event").is_none());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ThreadStatus::Active.is_terminal());
        assert!(!ThreadStatus::Waiting.is_terminal());
        assert!(ThreadStatus::Completed.is_terminal());
        assert!(ThreadStatus::Archived.is_terminal());
    }
}
