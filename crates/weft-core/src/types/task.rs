//! Task - time-triggered chain invocation, persisted and restorable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chain::ChainSpec;
use super::thread::ThreadId;

/// What fires the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskTrigger {
    /// Fire every `seconds` seconds.
    Interval { seconds: u64 },
    /// Fire exactly once at `at`.
    Once { at: DateTime<Utc> },
    /// Reserved; scheduling a cron task is rejected as an invalid trigger.
    Cron { expression: String },
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Scheduled,
    Completed,
    Cancelled,
}

/// A persisted time-triggered chain invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub trigger: TaskTrigger,
    /// Chain executed on each fire.
    pub action: ChainSpec,
    /// Thread the chain runs against; a fresh thread is created per fire
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(name: impl Into<String>, trigger: TaskTrigger, action: ChainSpec) -> Self {
        let short = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("task_{}", &short[..8]),
            name: name.into(),
            trigger,
            action,
            thread_id: None,
            status: TaskStatus::Scheduled,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<ThreadId>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Whether the trigger fires at most once.
    pub fn is_once(&self) -> bool {
        matches!(self.trigger, TaskTrigger::Once { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChainStep, InvokeStep};

    #[test]
    fn test_task_trigger_serde_shape() {
        let task = Task::new(
            "morning brief",
            TaskTrigger::Interval { seconds: 3600 },
            ChainSpec::new(vec![ChainStep::Invoke(InvokeStep::new("user.notify"))]),
        );

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["trigger"]["kind"], "interval");
        assert_eq!(value["trigger"]["seconds"], 3600);
        assert_eq!(value["status"], "scheduled");

        let decoded: Task = serde_json::from_value(value).unwrap();
        assert!(!decoded.is_once());
        assert_eq!(decoded.action.len(), 1);
    }
}
