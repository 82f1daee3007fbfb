//! Hook - pattern-triggered chain invoked around matching publishes.

use serde::{Deserialize, Serialize};

use super::chain::ChainSpec;

/// Where the hook runs relative to the event's normal handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HookPosition {
    Pre,
    #[default]
    Post,
}

/// A pattern-matched chain. Hooks are not bound to a thread; their chains
/// execute against an ephemeral scratch thread and results are discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub id: String,
    pub name: String,
    /// Glob over dot-hierarchical event types, e.g. `email.*`.
    pub pattern: String,
    #[serde(default)]
    pub position: HookPosition,
    pub action: ChainSpec,
}

impl Hook {
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        position: HookPosition,
        action: ChainSpec,
    ) -> Self {
        let short = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("hook_{}", &short[..8]),
            name: name.into(),
            pattern: pattern.into(),
            position,
            action,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}
