//! Engine bootstrap: builds and wires every component from config.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use weft_bus::{BusConfig, BusError, EventBus, PublishResult};
use weft_config::{ConfigError, WeftConfig};
use weft_core::capability::Decider;
use weft_core::store::{RecordStore, StoreError, ThreadStore};
use weft_core::types::{ChainSpec, Hook, SYSTEM_SOURCE};
use weft_stores::{
    FileRecordStore, FileThreadStore, InMemoryRecordStore, InMemoryThreadStore, JsonlHistoryLog,
};

use crate::hooks::{ChainHookRunner, HookRegistry};
use crate::interpreter::{ChainError, ChainInterpreter, ChainOutcome, RuntimeConfig};
use crate::manage::register_management;
use crate::scheduler::{run_ingress, ScheduleError, SchedulerBridge, HOOK_NAMESPACE};

/// Startup errors. Once the engine is running, nothing in this enum can
/// occur again; only config problems are fatal.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// The assembled engine: bus, stores, interpreter, hooks, and scheduler,
/// plus the spawned ingress loop.
pub struct Engine {
    config: WeftConfig,
    bus: Arc<EventBus>,
    threads: Arc<dyn ThreadStore>,
    records: Arc<dyn RecordStore>,
    interpreter: Arc<ChainInterpreter>,
    hooks: Arc<HookRegistry>,
    scheduler: Arc<SchedulerBridge>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Build every component, restore persisted tasks/hooks/history, and
    /// spawn the ingress loop.
    pub async fn start(
        config: WeftConfig,
        decider: Arc<dyn Decider>,
    ) -> Result<Self, EngineError> {
        let (threads, records): (Arc<dyn ThreadStore>, Arc<dyn RecordStore>) =
            if config.stores.backend == "file" {
                let base = PathBuf::from(&config.stores.path);
                (
                    Arc::new(FileThreadStore::new(base.join("threads")).await?),
                    Arc::new(FileRecordStore::new(base.join("records")).await?),
                )
            } else {
                (
                    Arc::new(InMemoryThreadStore::new()),
                    Arc::new(InMemoryRecordStore::new()),
                )
            };

        let bus = Arc::new(EventBus::new(BusConfig {
            max_history: config.bus.max_history,
            handler_timeout: config.bus.handler_timeout_secs.map(Duration::from_secs),
        }));
        bus.set_repair(decider.clone()).await;

        // The sink sits on the bus itself, so chain steps, hook chains, and
        // task fires are persisted the same as direct publishes.
        if let Some(path) = &config.bus.persist_history_path {
            let log = JsonlHistoryLog::new(path);
            bus.replay_history(log.load()?)?;
            bus.set_history_sink(Arc::new(log)).await;
        }

        let interpreter = Arc::new(ChainInterpreter::new(
            bus.clone(),
            threads.clone(),
            decider,
            RuntimeConfig {
                step_timeout: config.runtime.step_timeout_secs.map(Duration::from_secs),
                chain_timeout: config.runtime.chain_timeout_secs.map(Duration::from_secs),
                scratch_thread_prefix: config.runtime.scratch_thread_prefix.clone(),
            },
        ));

        let hooks = Arc::new(HookRegistry::new());
        bus.set_hook_runner(Arc::new(ChainHookRunner::new(
            hooks.clone(),
            Arc::downgrade(&interpreter),
        )))
        .await;

        let (scheduler, ingress_rx) =
            SchedulerBridge::new(records.clone(), config.scheduler.ingress_capacity);
        register_management(&bus, scheduler.clone(), hooks.clone(), records.clone()).await?;

        let restored_tasks = scheduler.restore().await;
        let restored_hooks = restore_hooks(records.as_ref(), hooks.as_ref()).await;
        tracing::info!(
            app = %config.app.name,
            restored_tasks,
            restored_hooks,
            "engine started"
        );

        let shutdown = CancellationToken::new();
        tokio::spawn(run_ingress(
            ingress_rx,
            interpreter.clone(),
            threads.clone(),
            shutdown.child_token(),
        ));

        Ok(Self {
            config,
            bus,
            threads,
            records,
            interpreter,
            hooks,
            scheduler,
            shutdown,
        })
    }

    /// Publish an event with the `system` source.
    pub async fn publish(&self, event_type: &str, data: Value) -> Result<PublishResult, BusError> {
        self.bus.publish(event_type, data, SYSTEM_SOURCE).await
    }

    /// Execute a chain, creating a fresh thread when none is given.
    pub async fn run_chain(
        &self,
        chain: &ChainSpec,
        thread_id: Option<&str>,
    ) -> Result<ChainOutcome, ChainError> {
        let thread_id = match thread_id {
            Some(id) => id.to_string(),
            None => self.threads.create(None, HashMap::new()).await?.id,
        };
        let cancel = self.shutdown.child_token();
        self.interpreter.execute(chain, &thread_id, &cancel).await
    }

    /// Stop the ingress loop and cancel in-flight chains at their next
    /// step boundary.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn config(&self) -> &WeftConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn threads(&self) -> &Arc<dyn ThreadStore> {
        &self.threads
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn scheduler(&self) -> &Arc<SchedulerBridge> {
        &self.scheduler
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn interpreter(&self) -> &Arc<ChainInterpreter> {
        &self.interpreter
    }
}

async fn restore_hooks(records: &dyn RecordStore, registry: &HookRegistry) -> usize {
    let persisted = match records.list(HOOK_NAMESPACE).await {
        Ok(persisted) => persisted,
        Err(err) => {
            tracing::error!(error = %err, "failed to list persisted hooks");
            return 0;
        }
    };
    let mut restored = 0;
    for (id, value) in persisted {
        match serde_json::from_value::<Hook>(value) {
            Ok(hook) => match registry.register(hook).await {
                Ok(()) => restored += 1,
                Err(err) => {
                    tracing::error!(hook_id = %id, error = %err, "failed to re-register hook");
                }
            },
            Err(err) => {
                tracing::error!(hook_id = %id, error = %err, "skipping unrestorable hook record");
            }
        }
    }
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weft_bus::FnHandler;
    use weft_core::capability::NullDecider;
    use weft_core::types::InvokeStep;

    fn counting_handler(name: &str) -> (Arc<FnHandler>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_inner = count.clone();
        let handler = Arc::new(FnHandler::new(name, move |_event| {
            let count = count_inner.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"delivered": true}))
            })
        }));
        (handler, count)
    }

    #[test]
    fn test_once_task_fires_and_leaves_the_list() {
        tokio_test::block_on(async {
            tokio::time::pause();
            let engine = Engine::start(WeftConfig::default(), Arc::new(NullDecider))
                .await
                .unwrap();
            let (handler, count) = counting_handler("notify");
            engine
                .bus()
                .register("user.notify", handler, None)
                .await
                .unwrap();

            let at = Utc::now() + chrono::Duration::seconds(2);
            engine
                .publish(
                    "task.schedule",
                    json!({
                        "name": "reminder",
                        "trigger": {"kind": "once", "at": at},
                        "action": [{"event": "user.notify", "params": {"message": "ping"}}],
                    }),
                )
                .await
                .unwrap();
            assert_eq!(engine.scheduler().list().await.len(), 1);

            tokio::time::sleep(Duration::from_secs(10)).await;

            assert_eq!(count.load(Ordering::SeqCst), 1);
            let listed = engine.publish("task.list", json!({})).await.unwrap();
            assert!(listed.aggregated()["tasks"].as_array().unwrap().is_empty());
        });
    }

    #[test]
    fn test_hook_fires_once_per_matching_publish() {
        tokio_test::block_on(async {
            let engine = Engine::start(WeftConfig::default(), Arc::new(NullDecider))
                .await
                .unwrap();
            let (handler, count) = counting_handler("audit");
            engine
                .bus()
                .register("audit.log", handler, None)
                .await
                .unwrap();

            engine
                .publish(
                    "task.register",
                    json!({
                        "name": "audit everything",
                        "pattern": "audit.*",
                        "action": [{"event": "audit.log", "params": {"via": "hook"}}],
                    }),
                )
                .await
                .unwrap();

            // The direct publish matches the hook, whose own audit.log
            // publish carries source "hook" and must not re-trigger it.
            engine.publish("audit.log", json!({})).await.unwrap();
            assert_eq!(count.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn test_file_backend_restores_tasks_and_hooks() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let mut config = WeftConfig::default();
            config.stores.backend = "file".to_string();
            config.stores.path = dir.path().to_string_lossy().into_owned();

            {
                let engine = Engine::start(config.clone(), Arc::new(NullDecider))
                    .await
                    .unwrap();
                let at = Utc::now() + chrono::Duration::hours(1);
                engine
                    .publish(
                        "task.schedule",
                        json!({
                            "name": "later",
                            "trigger": {"kind": "once", "at": at},
                            "action": [{"event": "user.notify"}],
                        }),
                    )
                    .await
                    .unwrap();
                engine
                    .publish(
                        "task.register",
                        json!({
                            "name": "watcher",
                            "pattern": "email.*",
                            "action": [{"event": "audit.log"}],
                        }),
                    )
                    .await
                    .unwrap();
                engine.shutdown();
            }

            let engine = Engine::start(config, Arc::new(NullDecider)).await.unwrap();
            assert_eq!(engine.scheduler().list().await.len(), 1);
            let hooks = engine.hooks().list().await;
            assert_eq!(hooks.len(), 1);
            assert_eq!(hooks[0].pattern, "email.*");
        });
    }

    #[test]
    fn test_history_replays_across_restart() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let mut config = WeftConfig::default();
            config.bus.persist_history_path = Some(
                dir.path()
                    .join("history.jsonl")
                    .to_string_lossy()
                    .into_owned(),
            );

            {
                let engine = Engine::start(config.clone(), Arc::new(NullDecider))
                    .await
                    .unwrap();
                engine
                    .publish("ping.event", json!({"n": 1}))
                    .await
                    .unwrap();
                engine.shutdown();
            }

            let engine = Engine::start(config, Arc::new(NullDecider)).await.unwrap();
            let history = engine.bus().history(Some("ping.event")).unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].data["n"], 1);
        });
    }

    #[test]
    fn test_chain_step_publishes_are_persisted() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let mut config = WeftConfig::default();
            config.bus.persist_history_path = Some(
                dir.path()
                    .join("history.jsonl")
                    .to_string_lossy()
                    .into_owned(),
            );

            {
                let engine = Engine::start(config.clone(), Arc::new(NullDecider))
                    .await
                    .unwrap();
                let chain = ChainSpec::builder()
                    .invoke(InvokeStep::new("tools.now"))
                    .build();
                engine.run_chain(&chain, None).await.unwrap();
                assert_eq!(engine.bus().history(Some("tools.now")).unwrap().len(), 1);
                engine.shutdown();
            }

            // The step publish never went through Engine::publish; it must
            // still survive the restart.
            let engine = Engine::start(config, Arc::new(NullDecider)).await.unwrap();
            assert_eq!(engine.bus().history(Some("tools.now")).unwrap().len(), 1);
        });
    }
}
