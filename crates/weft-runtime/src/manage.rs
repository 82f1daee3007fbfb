//! Management surface: task and hook operations as ordinary bus events.
//!
//! `task.schedule`, `task.cancel`, `task.list`, `task.register`, and
//! `task.unregister` are handled by the engine itself, so chains can
//! schedule follow-up work or install hooks the same way they invoke any
//! other event.

use std::sync::Arc;

use serde_json::{json, Value};

use weft_bus::{BusError, EventBus, FnHandler, HandlerError};
use weft_core::schema::{FieldSpec, JsonKind, ParamSchema};
use weft_core::store::RecordStore;
use weft_core::types::{ChainSpec, Hook, HookPosition, Task, TaskTrigger};

use crate::hooks::HookRegistry;
use crate::scheduler::{SchedulerBridge, HOOK_NAMESPACE};

const MANAGE_HANDLER: &str = "manage";

/// Register the management handlers and their schemas on the bus.
pub async fn register_management(
    bus: &EventBus,
    bridge: Arc<SchedulerBridge>,
    registry: Arc<HookRegistry>,
    records: Arc<dyn RecordStore>,
) -> Result<(), BusError> {
    {
        let bridge = bridge.clone();
        let handler = Arc::new(FnHandler::new(MANAGE_HANDLER, move |event| {
            let bridge = bridge.clone();
            Box::pin(async move { schedule_task(&bridge, &event.data).await })
        }));
        let schema = ParamSchema::new()
            .field("name", FieldSpec::required(JsonKind::String))
            .field("trigger", FieldSpec::required(JsonKind::Object))
            .field("action", FieldSpec::required(JsonKind::Array))
            .field("task_id", FieldSpec::optional(JsonKind::String))
            .field("thread_id", FieldSpec::optional(JsonKind::String));
        bus.register("task.schedule", handler, Some(schema)).await?;
    }

    {
        let bridge = bridge.clone();
        let handler = Arc::new(FnHandler::new(MANAGE_HANDLER, move |event| {
            let bridge = bridge.clone();
            Box::pin(async move { cancel_task(&bridge, &event.data).await })
        }));
        let schema =
            ParamSchema::new().field("task_id", FieldSpec::required(JsonKind::String));
        bus.register("task.cancel", handler, Some(schema)).await?;
    }

    {
        let bridge = bridge.clone();
        let registry = registry.clone();
        let handler = Arc::new(FnHandler::new(MANAGE_HANDLER, move |_event| {
            let bridge = bridge.clone();
            let registry = registry.clone();
            Box::pin(async move { list_tasks(&bridge, &registry).await })
        }));
        bus.register("task.list", handler, None).await?;
    }

    {
        let registry = registry.clone();
        let records = records.clone();
        let handler = Arc::new(FnHandler::new(MANAGE_HANDLER, move |event| {
            let registry = registry.clone();
            let records = records.clone();
            Box::pin(async move { register_hook(&registry, records.as_ref(), &event.data).await })
        }));
        let schema = ParamSchema::new()
            .field("name", FieldSpec::required(JsonKind::String))
            .field("pattern", FieldSpec::required(JsonKind::String))
            .field("position", FieldSpec::optional(JsonKind::String))
            .field("action", FieldSpec::required(JsonKind::Array));
        bus.register("task.register", handler, Some(schema)).await?;
    }

    {
        let handler = Arc::new(FnHandler::new(MANAGE_HANDLER, move |event| {
            let registry = registry.clone();
            let records = records.clone();
            Box::pin(async move { unregister_hook(&registry, records.as_ref(), &event.data).await })
        }));
        let schema =
            ParamSchema::new().field("hook_id", FieldSpec::required(JsonKind::String));
        bus.register("task.unregister", handler, Some(schema)).await?;
    }

    Ok(())
}

async fn schedule_task(
    bridge: &Arc<SchedulerBridge>,
    data: &Value,
) -> Result<Value, HandlerError> {
    let name = data
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("task")
        .to_string();
    let trigger: TaskTrigger =
        serde_json::from_value(data.get("trigger").cloned().unwrap_or(Value::Null))
            .map_err(|e| HandlerError(format!("invalid trigger: {}", e)))?;
    let action: ChainSpec =
        serde_json::from_value(data.get("action").cloned().unwrap_or(Value::Null))
            .map_err(|e| HandlerError(format!("invalid action: {}", e)))?;

    let mut task = Task::new(name, trigger, action);
    if let Some(id) = data.get("task_id").and_then(Value::as_str) {
        task = task.with_id(id);
    }
    if let Some(thread_id) = data.get("thread_id").and_then(Value::as_str) {
        task = task.with_thread(thread_id);
    }

    let task_id = task.id.clone();
    bridge
        .schedule(task)
        .await
        .map_err(|e| HandlerError(e.to_string()))?;
    Ok(json!({"task_id": task_id, "status": "scheduled"}))
}

async fn cancel_task(bridge: &SchedulerBridge, data: &Value) -> Result<Value, HandlerError> {
    let task_id = data
        .get("task_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let cancelled = bridge
        .cancel(&task_id)
        .await
        .map_err(|e| HandlerError(e.to_string()))?;
    Ok(json!({"task_id": task_id, "cancelled": cancelled}))
}

fn trigger_kind(trigger: &TaskTrigger) -> &'static str {
    match trigger {
        TaskTrigger::Interval { .. } => "interval",
        TaskTrigger::Once { .. } => "once",
        TaskTrigger::Cron { .. } => "cron",
    }
}

async fn list_tasks(
    bridge: &SchedulerBridge,
    registry: &HookRegistry,
) -> Result<Value, HandlerError> {
    let tasks: Vec<Value> = bridge
        .list()
        .await
        .iter()
        .map(|task| {
            json!({
                "id": task.id,
                "name": task.name,
                "kind": trigger_kind(&task.trigger),
            })
        })
        .collect();
    let hooks: Vec<Value> = registry
        .list()
        .await
        .iter()
        .map(|hook| {
            json!({
                "id": hook.id,
                "name": hook.name,
                "pattern": hook.pattern,
                "position": hook.position,
            })
        })
        .collect();
    Ok(json!({"tasks": tasks, "hooks": hooks}))
}

async fn register_hook(
    registry: &HookRegistry,
    records: &dyn RecordStore,
    data: &Value,
) -> Result<Value, HandlerError> {
    let name = data
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("hook")
        .to_string();
    let pattern = data
        .get("pattern")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let position: HookPosition = match data.get("position") {
        Some(value) if !value.is_null() => serde_json::from_value(value.clone())
            .map_err(|e| HandlerError(format!("invalid position: {}", e)))?,
        _ => HookPosition::default(),
    };
    let action: ChainSpec =
        serde_json::from_value(data.get("action").cloned().unwrap_or(Value::Null))
            .map_err(|e| HandlerError(format!("invalid action: {}", e)))?;

    let hook = Hook::new(name, pattern, position, action);
    let record =
        serde_json::to_value(&hook).map_err(|e| HandlerError(e.to_string()))?;
    let hook_id = hook.id.clone();
    registry
        .register(hook)
        .await
        .map_err(|e| HandlerError(e.to_string()))?;
    records
        .put(HOOK_NAMESPACE, &hook_id, record)
        .await
        .map_err(|e| HandlerError(e.to_string()))?;
    Ok(json!({"hook_id": hook_id, "status": "registered"}))
}

/// Remove a hook and its persisted record, so it stays gone after restart.
async fn unregister_hook(
    registry: &HookRegistry,
    records: &dyn RecordStore,
    data: &Value,
) -> Result<Value, HandlerError> {
    let hook_id = data
        .get("hook_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let removed = registry.remove(&hook_id).await;
    if removed {
        records
            .delete(HOOK_NAMESPACE, &hook_id)
            .await
            .map_err(|e| HandlerError(e.to_string()))?;
    }
    Ok(json!({"hook_id": hook_id, "removed": removed}))
}
