//! Hook registry and the bus-side hook runner.
//!
//! Hooks are glob patterns over dot-hierarchical event types. Matching
//! hooks run their chains against a scratch thread around each publish;
//! hook-chain failures are logged and never surface to the publisher.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use glob::Pattern;
use tokio::sync::RwLock;

use weft_bus::HookRunner;
use weft_core::types::{Event, Hook, HookPosition};

use crate::interpreter::ChainInterpreter;
use crate::scheduler::ScheduleError;

pub struct HookRegistry {
    hooks: RwLock<HashMap<String, (Pattern, Hook)>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a hook. The pattern is compiled here so a bad pattern is
    /// rejected at registration time rather than on first match.
    pub async fn register(&self, hook: Hook) -> Result<(), ScheduleError> {
        let pattern = Pattern::new(&hook.pattern)
            .map_err(|e| ScheduleError::InvalidPattern(format!("{}: {}", hook.pattern, e)))?;
        let mut hooks = self.hooks.write().await;
        if hooks.contains_key(&hook.id) {
            return Err(ScheduleError::Conflict(hook.id));
        }
        tracing::info!(hook_id = %hook.id, pattern = %hook.pattern, "registered hook");
        hooks.insert(hook.id.clone(), (pattern, hook));
        Ok(())
    }

    /// Remove a hook by id; idempotent.
    pub async fn remove(&self, hook_id: &str) -> bool {
        self.hooks.write().await.remove(hook_id).is_some()
    }

    pub async fn list(&self) -> Vec<Hook> {
        let hooks = self.hooks.read().await;
        let mut out: Vec<Hook> = hooks.values().map(|(_, h)| h.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Hooks whose pattern matches `event_type` at the given position.
    pub async fn matching(&self, position: HookPosition, event_type: &str) -> Vec<Hook> {
        let hooks = self.hooks.read().await;
        let mut out: Vec<Hook> = hooks
            .values()
            .filter(|(pattern, hook)| hook.position == position && pattern.matches(event_type))
            .map(|(_, hook)| hook.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridges the bus to the interpreter: runs every matching hook's chain
/// around a publish. Holds the interpreter weakly; once the runtime is
/// gone, hooks silently stop firing.
pub struct ChainHookRunner {
    registry: Arc<HookRegistry>,
    interpreter: Weak<ChainInterpreter>,
}

impl ChainHookRunner {
    pub fn new(registry: Arc<HookRegistry>, interpreter: Weak<ChainInterpreter>) -> Self {
        Self {
            registry,
            interpreter,
        }
    }
}

#[async_trait]
impl HookRunner for ChainHookRunner {
    async fn run_hooks(&self, position: HookPosition, event: &Event) {
        let hooks = self.registry.matching(position, &event.event_type).await;
        if hooks.is_empty() {
            return;
        }
        let Some(interpreter) = self.interpreter.upgrade() else {
            return;
        };
        for hook in hooks {
            tracing::debug!(hook_id = %hook.id, event_type = %event.event_type, "running hook chain");
            if let Err(err) = interpreter.run_hook_chain(&hook, event).await {
                tracing::error!(hook_id = %hook.id, error = %err, "hook chain failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::ChainSpec;

    fn hook(id: &str, pattern: &str, position: HookPosition) -> Hook {
        Hook::new(id, pattern, position, ChainSpec::default()).with_id(id)
    }

    #[test]
    fn test_matching_respects_pattern_and_position() {
        tokio_test::block_on(async {
            let registry = HookRegistry::new();
            registry
                .register(hook("h1", "email.*", HookPosition::Post))
                .await
                .unwrap();
            registry
                .register(hook("h2", "email.*", HookPosition::Pre))
                .await
                .unwrap();
            registry
                .register(hook("h3", "calendar.*", HookPosition::Post))
                .await
                .unwrap();

            let post = registry.matching(HookPosition::Post, "email.received").await;
            assert_eq!(post.len(), 1);
            assert_eq!(post[0].id, "h1");

            let pre = registry.matching(HookPosition::Pre, "email.received").await;
            assert_eq!(pre.len(), 1);
            assert_eq!(pre[0].id, "h2");

            assert!(registry
                .matching(HookPosition::Post, "tools.now")
                .await
                .is_empty());
        });
    }

    #[test]
    fn test_register_rejects_duplicate_id_and_bad_pattern() {
        tokio_test::block_on(async {
            let registry = HookRegistry::new();
            registry
                .register(hook("h1", "user.*", HookPosition::Post))
                .await
                .unwrap();
            assert!(matches!(
                registry
                    .register(hook("h1", "user.*", HookPosition::Post))
                    .await,
                Err(ScheduleError::Conflict(_))
            ));
            assert!(matches!(
                registry
                    .register(hook("h2", "user.[", HookPosition::Post))
                    .await,
                Err(ScheduleError::InvalidPattern(_))
            ));
        });
    }

    #[test]
    fn test_remove_is_idempotent() {
        tokio_test::block_on(async {
            let registry = HookRegistry::new();
            registry
                .register(hook("h1", "*", HookPosition::Post))
                .await
                .unwrap();
            assert!(registry.remove("h1").await);
            assert!(!registry.remove("h1").await);
        });
    }
}
