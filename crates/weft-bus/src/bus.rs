//! EventBus - schema-validated concurrent dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use weft_core::capability::{Decider, DecisionAction, DecisionRequest};
use weft_core::schema::{ParamSchema, SchemaViolation};
use weft_core::store::HistorySink;
use weft_core::types::{Event, HookPosition};

use crate::history::EventHistory;

/// Handler-side failure, always namespaced to the failing handler in the
/// aggregated publish result.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Bus error types.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("validation failed for '{event_type}': {summary}")]
    Validation {
        event_type: String,
        summary: String,
        violations: Vec<SchemaViolation>,
    },

    #[error("handler '{handler}' already registered for '{event_type}'")]
    Conflict {
        event_type: String,
        handler: String,
    },

    #[error("history error: {0}")]
    History(#[from] weft_core::StoreError),
}

impl BusError {
    fn validation(event_type: &str, violations: Vec<SchemaViolation>) -> Self {
        let summary = violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Self::Validation {
            event_type: event_type.to_string(),
            summary,
            violations,
        }
    }
}

/// A subscriber. Handlers are identified by name; the same name may not be
/// registered twice for one event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> Result<Value, HandlerError>;
}

type HandlerFn =
    Arc<dyn Fn(Event) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

/// Closure-backed handler for wiring functions onto the bus.
pub struct FnHandler {
    name: String,
    func: HandlerFn,
}

impl FnHandler {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Event) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl EventHandler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<Value, HandlerError> {
        (self.func)(event.clone()).await
    }
}

/// Outcome of one handler invocation within a publish.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Ok(Value),
    Err { message: String },
}

impl HandlerOutcome {
    pub fn is_err(&self) -> bool {
        matches!(self, HandlerOutcome::Err { .. })
    }

    /// JSON shape used when aggregating results into a thread record.
    pub fn to_value(&self) -> Value {
        match self {
            HandlerOutcome::Ok(value) => value.clone(),
            HandlerOutcome::Err { message } => json!({"error": message}),
        }
    }
}

/// Aggregated result of one publish.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub event: Event,
    /// Per-handler outcome keyed by handler name.
    pub outcomes: HashMap<String, HandlerOutcome>,
}

impl PublishResult {
    /// Collapse the outcome map the way chain steps record results: empty
    /// object for no handlers, the bare value for a single handler, and an
    /// object keyed by handler name otherwise.
    pub fn aggregated(&self) -> Value {
        match self.outcomes.len() {
            0 => json!({}),
            1 => self
                .outcomes
                .values()
                .next()
                .map(HandlerOutcome::to_value)
                .unwrap_or(Value::Null),
            _ => Value::Object(
                self.outcomes
                    .iter()
                    .map(|(name, outcome)| (name.clone(), outcome.to_value()))
                    .collect(),
            ),
        }
    }

    /// True when at least one handler ran and every one of them failed.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.values().all(HandlerOutcome::is_err)
    }

    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                HandlerOutcome::Err { message } => Some((name.as_str(), message.as_str())),
                HandlerOutcome::Ok(_) => None,
            })
            .collect()
    }
}

/// Runs hook chains around a publish. Implemented by the runtime so the bus
/// stays ignorant of chain execution.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run_hooks(&self, position: HookPosition, event: &Event);
}

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum number of events retained in history.
    pub max_history: usize,
    /// Per-handler invocation timeout; exceeding it is a handler failure.
    pub handler_timeout: Option<Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_history: 1_000,
            handler_timeout: None,
        }
    }
}

struct Registration {
    handler: Arc<dyn EventHandler>,
}

/// The event registry / bus.
///
/// Process-scoped state with an explicit construction lifecycle; injected
/// into components rather than accessed as an ambient global.
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Registration>>>,
    schemas: RwLock<HashMap<String, ParamSchema>>,
    history: EventHistory,
    history_sink: RwLock<Option<Arc<dyn HistorySink>>>,
    repair: RwLock<Option<Arc<dyn Decider>>>,
    hook_runner: RwLock<Option<Arc<dyn HookRunner>>>,
    config: BusConfig,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            schemas: RwLock::new(HashMap::new()),
            history: EventHistory::new(config.max_history),
            history_sink: RwLock::new(None),
            repair: RwLock::new(None),
            hook_runner: RwLock::new(None),
            config,
        }
    }

    /// Wire in the parameter-repair capability. Without one, validation
    /// failures are terminal on the first attempt.
    pub async fn set_repair(&self, decider: Arc<dyn Decider>) {
        *self.repair.write().await = Some(decider);
    }

    /// Wire in the hook runner. Hooks are skipped entirely until one is set.
    pub async fn set_hook_runner(&self, runner: Arc<dyn HookRunner>) {
        *self.hook_runner.write().await = Some(runner);
    }

    /// Wire in a durable history sink. Every publish is recorded there,
    /// regardless of who initiated it; a sink failure is logged, never
    /// surfaced to the publisher.
    pub async fn set_history_sink(&self, sink: Arc<dyn HistorySink>) {
        *self.history_sink.write().await = Some(sink);
    }

    /// Add a registration for `event_type`. Existing registrations are kept;
    /// registering the same handler name twice for one type is a conflict.
    pub async fn register(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        schema: Option<ParamSchema>,
    ) -> Result<(), BusError> {
        let mut handlers = self.handlers.write().await;
        let registrations = handlers.entry(event_type.to_string()).or_default();
        if registrations
            .iter()
            .any(|r| r.handler.name() == handler.name())
        {
            return Err(BusError::Conflict {
                event_type: event_type.to_string(),
                handler: handler.name().to_string(),
            });
        }
        tracing::info!(event_type, handler = handler.name(), "registered handler");
        registrations.push(Registration { handler });

        if let Some(schema) = schema {
            self.schemas
                .write()
                .await
                .insert(event_type.to_string(), schema);
        }
        Ok(())
    }

    /// Remove a registration by handler name; idempotent.
    pub async fn unsubscribe(&self, event_type: &str, handler_name: &str) {
        let mut handlers = self.handlers.write().await;
        if let Some(registrations) = handlers.get_mut(event_type) {
            registrations.retain(|r| r.handler.name() != handler_name);
        }
    }

    /// Publish an event: validate (with one repair retry), append to
    /// history, run pre hooks, dispatch all handlers concurrently, run post
    /// hooks, and return the aggregated per-handler outcomes.
    pub async fn publish(
        &self,
        event_type: &str,
        data: Value,
        source: &str,
    ) -> Result<PublishResult, BusError> {
        let data = self.validate(event_type, data).await?;
        let event = Event::with_source(event_type, data, source);

        // History first, so handlers that publish see a causal prefix.
        self.history.append(event.clone())?;
        if let Some(sink) = self.history_sink.read().await.clone() {
            if let Err(err) = sink.record(&event) {
                tracing::warn!(event_type, error = %err, "failed to persist history event");
            }
        }
        tracing::debug!(event_type, source, "publishing event");

        self.run_hooks(HookPosition::Pre, &event).await;

        let registrations: Vec<Arc<dyn EventHandler>> = {
            let handlers = self.handlers.read().await;
            handlers
                .get(event_type)
                .map(|regs| regs.iter().map(|r| r.handler.clone()).collect())
                .unwrap_or_default()
        };

        let timeout = self.config.handler_timeout;
        let invocations = registrations.iter().map(|handler| {
            let handler = handler.clone();
            let event = event.clone();
            async move {
                let name = handler.name().to_string();
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, handler.handle(&event)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(HandlerError(format!(
                            "handler timed out after {:?}",
                            limit
                        ))),
                    },
                    None => handler.handle(&event).await,
                };
                (name, result)
            }
        });

        let mut outcomes = HashMap::new();
        for (name, result) in join_all(invocations).await {
            match result {
                Ok(value) => {
                    outcomes.insert(name, HandlerOutcome::Ok(value));
                }
                Err(err) => {
                    tracing::error!(event_type, handler = %name, error = %err, "handler failed");
                    outcomes.insert(
                        name,
                        HandlerOutcome::Err {
                            message: err.to_string(),
                        },
                    );
                }
            }
        }

        self.run_hooks(HookPosition::Post, &event).await;

        Ok(PublishResult { event, outcomes })
    }

    /// Validate against the exact-match schema; on failure forward to the
    /// repair capability and retry exactly once.
    async fn validate(&self, event_type: &str, data: Value) -> Result<Value, BusError> {
        let schema = {
            let schemas = self.schemas.read().await;
            schemas.get(event_type).cloned()
        };
        let Some(schema) = schema else {
            return Ok(data);
        };

        let violations = match schema.validate(&data) {
            Ok(()) => return Ok(data),
            Err(violations) => violations,
        };

        let repair = self.repair.read().await.clone();
        let Some(repair) = repair else {
            return Err(BusError::validation(event_type, violations));
        };

        tracing::warn!(
            event_type,
            violations = violations.len(),
            "validation failed, requesting repair"
        );
        let request = DecisionRequest::repair(event_type, data.clone(), violations.clone());
        let repaired = match repair.decide(request).await {
            Ok(decision) if decision.action == DecisionAction::Continue => {
                decision.params.unwrap_or(data)
            }
            Ok(_) | Err(_) => return Err(BusError::validation(event_type, violations)),
        };

        match schema.validate(&repaired) {
            Ok(()) => Ok(repaired),
            // Second failure is hard.
            Err(violations) => Err(BusError::validation(event_type, violations)),
        }
    }

    async fn run_hooks(&self, position: HookPosition, event: &Event) {
        // Re-entrancy guard: hook-originated publishes never match hooks.
        if event.is_hook_originated() {
            return;
        }
        let runner = self.hook_runner.read().await.clone();
        if let Some(runner) = runner {
            runner.run_hooks(position, event).await;
        }
    }

    /// Append-ordered view of past publishes, optionally filtered.
    pub fn history(&self, event_type: Option<&str>) -> Result<Vec<Event>, BusError> {
        Ok(self.history.snapshot(event_type)?)
    }

    /// Seed history from persisted events (startup replay).
    pub fn replay_history(&self, events: Vec<Event>) -> Result<(), BusError> {
        Ok(self.history.replay(events)?)
    }

    /// Registered event types, for introspection.
    pub async fn registered_types(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        let mut types: Vec<String> = handlers
            .iter()
            .filter(|(_, regs)| !regs.is_empty())
            .map(|(t, _)| t.clone())
            .collect();
        types.sort();
        types
    }

    pub async fn has_handler(&self, event_type: &str) -> bool {
        let handlers = self.handlers.read().await;
        handlers.get(event_type).is_some_and(|regs| !regs.is_empty())
    }

    pub async fn schema(&self, event_type: &str) -> Option<ParamSchema> {
        self.schemas.read().await.get(event_type).cloned()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weft_core::capability::{CapabilityError, Decision};
    use weft_core::schema::{FieldSpec, JsonKind};

    fn ok_handler(name: &str, value: Value) -> Arc<FnHandler> {
        Arc::new(FnHandler::new(name, move |_event| {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        }))
    }

    fn failing_handler(name: &str, message: &str) -> Arc<FnHandler> {
        let message = message.to_string();
        Arc::new(FnHandler::new(name, move |_event| {
            let message = message.clone();
            Box::pin(async move { Err(HandlerError(message)) })
        }))
    }

    #[test]
    fn test_register_rejects_duplicate_handler_name() {
        tokio_test::block_on(async {
            let bus = EventBus::default();
            bus.register("user.notify", ok_handler("notify", json!({})), None)
                .await
                .unwrap();
            let err = bus
                .register("user.notify", ok_handler("notify", json!({})), None)
                .await
                .unwrap_err();
            assert!(matches!(err, BusError::Conflict { .. }));

            // Different name for the same type is fine.
            bus.register("user.notify", ok_handler("audit", json!({})), None)
                .await
                .unwrap();
        });
    }

    #[test]
    fn test_publish_collects_per_handler_outcomes() {
        tokio_test::block_on(async {
            let bus = EventBus::default();
            bus.register("fan.out", ok_handler("a", json!({"ok": 1})), None)
                .await
                .unwrap();
            bus.register("fan.out", failing_handler("b", "boom"), None)
                .await
                .unwrap();
            bus.register("fan.out", ok_handler("c", json!({"ok": 3})), None)
                .await
                .unwrap();

            let result = bus.publish("fan.out", json!({}), "system").await.unwrap();
            assert_eq!(result.outcomes.len(), 3);
            assert!(!result.all_failed());
            let failures = result.failures();
            assert_eq!(failures, vec![("b", "boom")]);

            let aggregated = result.aggregated();
            assert_eq!(aggregated["a"]["ok"], 1);
            assert_eq!(aggregated["b"]["error"], "boom");
            assert_eq!(aggregated["c"]["ok"], 3);
        });
    }

    #[test]
    fn test_publish_without_handlers_returns_empty_result() {
        tokio_test::block_on(async {
            let bus = EventBus::default();
            let result = bus
                .publish("nobody.home", json!({"x": 1}), "system")
                .await
                .unwrap();
            assert!(result.outcomes.is_empty());
            assert_eq!(result.aggregated(), json!({}));
        });
    }

    #[test]
    fn test_history_appended_before_handlers_run() {
        tokio_test::block_on(async {
            let bus = Arc::new(EventBus::default());
            let seen = Arc::new(AtomicUsize::new(0));
            let bus_inner = bus.clone();
            let seen_inner = seen.clone();
            let handler = Arc::new(FnHandler::new("observer", move |_event| {
                let bus = bus_inner.clone();
                let seen = seen_inner.clone();
                Box::pin(async move {
                    seen.store(bus.history(Some("causal.check")).unwrap().len(), Ordering::SeqCst);
                    Ok(json!({}))
                })
            }));
            bus.register("causal.check", handler, None).await.unwrap();

            bus.publish("causal.check", json!({}), "system")
                .await
                .unwrap();
            // The handler saw its own triggering event already in history.
            assert_eq!(seen.load(Ordering::SeqCst), 1);
        });
    }

    struct RecordingSink(std::sync::Mutex<Vec<String>>);

    impl HistorySink for RecordingSink {
        fn record(&self, event: &Event) -> Result<(), weft_core::StoreError> {
            self.0.lock().unwrap().push(event.event_type.clone());
            Ok(())
        }
    }

    #[test]
    fn test_every_publish_reaches_the_history_sink() {
        tokio_test::block_on(async {
            let bus = EventBus::default();
            let sink = Arc::new(RecordingSink(std::sync::Mutex::new(Vec::new())));
            bus.set_history_sink(sink.clone()).await;

            bus.register("a.one", ok_handler("h", json!({})), None)
                .await
                .unwrap();
            bus.publish("a.one", json!({}), "system").await.unwrap();
            // No handlers for this type; still recorded.
            bus.publish("b.two", json!({}), "chain").await.unwrap();

            let seen = sink.0.lock().unwrap().clone();
            assert_eq!(seen, vec!["a.one", "b.two"]);
        });
    }

    #[test]
    fn test_validation_without_repair_fails_hard() {
        tokio_test::block_on(async {
            let bus = EventBus::default();
            let schema =
                ParamSchema::new().field("message", FieldSpec::required(JsonKind::String));
            bus.register("user.notify", ok_handler("notify", json!({})), Some(schema))
                .await
                .unwrap();

            let err = bus
                .publish("user.notify", json!({}), "system")
                .await
                .unwrap_err();
            match err {
                BusError::Validation { violations, .. } => {
                    assert_eq!(violations[0].field, "message")
                }
                other => panic!("expected validation error, got {:?}", other),
            }
        });
    }

    struct RepairingDecider;

    #[async_trait]
    impl Decider for RepairingDecider {
        async fn decide(&self, request: DecisionRequest) -> Result<Decision, CapabilityError> {
            let mut params = request.params.clone();
            if let Some(map) = params.as_object_mut() {
                map.insert("message".to_string(), json!("repaired"));
            }
            Ok(Decision {
                action: DecisionAction::Continue,
                params: Some(params),
                reason: None,
            })
        }
    }

    struct UselessDecider;

    #[async_trait]
    impl Decider for UselessDecider {
        async fn decide(&self, request: DecisionRequest) -> Result<Decision, CapabilityError> {
            Ok(Decision {
                action: DecisionAction::Continue,
                params: Some(request.params),
                reason: None,
            })
        }
    }

    #[test]
    fn test_repair_retries_once_and_succeeds() {
        tokio_test::block_on(async {
            let bus = EventBus::default();
            bus.set_repair(Arc::new(RepairingDecider)).await;
            let schema =
                ParamSchema::new().field("message", FieldSpec::required(JsonKind::String));
            let echo = Arc::new(FnHandler::new("echo", |event: Event| {
                Box::pin(async move { Ok(event.data) })
            }));
            bus.register("user.notify", echo, Some(schema)).await.unwrap();

            let result = bus
                .publish("user.notify", json!({}), "system")
                .await
                .unwrap();
            assert_eq!(result.aggregated()["message"], "repaired");
        });
    }

    #[test]
    fn test_second_validation_failure_is_hard() {
        tokio_test::block_on(async {
            let bus = EventBus::default();
            bus.set_repair(Arc::new(UselessDecider)).await;
            let schema =
                ParamSchema::new().field("message", FieldSpec::required(JsonKind::String));
            bus.register("user.notify", ok_handler("notify", json!({})), Some(schema))
                .await
                .unwrap();

            let err = bus
                .publish("user.notify", json!({}), "system")
                .await
                .unwrap_err();
            assert!(matches!(err, BusError::Validation { .. }));
        });
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        tokio_test::block_on(async {
            let bus = EventBus::default();
            bus.register("a.b", ok_handler("h", json!({})), None)
                .await
                .unwrap();
            bus.unsubscribe("a.b", "h").await;
            bus.unsubscribe("a.b", "h").await;
            bus.unsubscribe("never.registered", "h").await;
            assert!(!bus.has_handler("a.b").await);
        });
    }

    #[test]
    fn test_handler_timeout_is_a_handler_failure() {
        tokio_test::block_on(async {
            let bus = EventBus::new(BusConfig {
                max_history: 100,
                handler_timeout: Some(Duration::from_millis(20)),
            });
            let slow = Arc::new(FnHandler::new("slow", |_event| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(json!({}))
                })
            }));
            bus.register("slow.op", slow, None).await.unwrap();

            let result = bus.publish("slow.op", json!({}), "system").await.unwrap();
            assert!(result.all_failed());
            assert!(result.failures()[0].1.contains("timed out"));
        });
    }
}
