//! SchedulerBridge - timer tasks feeding a serialized ingress channel.
//!
//! Timers run on their own spawned tasks but never touch engine state
//! directly: every fire is handed through one bounded `mpsc` channel and
//! consumed by a single loop ([`run_ingress`]) inside the interpreter's
//! execution context. `Interval` fires that find the channel full are
//! coalesced (skipped, warned, counted); `Once` fires block until the
//! channel has room so they are never lost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use weft_core::store::{RecordStore, StoreError, ThreadStore};
use weft_core::types::{ChainSpec, Task, TaskTrigger, ThreadId};

use crate::interpreter::ChainInterpreter;

/// RecordStore namespace for persisted tasks.
pub const TASK_NAMESPACE: &str = "tasks";
/// RecordStore namespace for persisted hooks.
pub const HOOK_NAMESPACE: &str = "hooks";

/// Scheduling errors.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("'{0}' is already scheduled")]
    Conflict(String),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("invalid hook pattern: {0}")]
    InvalidPattern(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One timer fire, handed into the execution context.
#[derive(Debug, Clone)]
pub struct Ingress {
    pub task_id: String,
    pub name: String,
    pub action: ChainSpec,
    pub thread_id: Option<ThreadId>,
}

impl Ingress {
    fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            name: task.name.clone(),
            action: task.action.clone(),
            thread_id: task.thread_id.clone(),
        }
    }
}

struct ScheduledTask {
    task: Task,
    handle: JoinHandle<()>,
}

pub struct SchedulerBridge {
    tasks: RwLock<HashMap<String, ScheduledTask>>,
    tx: mpsc::Sender<Ingress>,
    records: Arc<dyn RecordStore>,
    coalesced: AtomicU64,
}

impl SchedulerBridge {
    /// Create the bridge and hand back the consumer end of the ingress
    /// channel, to be driven by [`run_ingress`].
    pub fn new(
        records: Arc<dyn RecordStore>,
        ingress_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Ingress>) {
        let (tx, rx) = mpsc::channel(ingress_capacity);
        (
            Arc::new(Self {
                tasks: RwLock::new(HashMap::new()),
                tx,
                records,
                coalesced: AtomicU64::new(0),
            }),
            rx,
        )
    }

    /// Schedule and persist a task.
    pub async fn schedule(self: &Arc<Self>, task: Task) -> Result<(), ScheduleError> {
        self.insert(task, true).await
    }

    async fn insert(self: &Arc<Self>, task: Task, persist: bool) -> Result<(), ScheduleError> {
        match &task.trigger {
            TaskTrigger::Interval { seconds } if *seconds == 0 => {
                return Err(ScheduleError::InvalidTrigger(
                    "interval must be at least one second".to_string(),
                ));
            }
            TaskTrigger::Cron { .. } => {
                return Err(ScheduleError::InvalidTrigger(
                    "cron triggers are not supported".to_string(),
                ));
            }
            _ => {}
        }

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(ScheduleError::Conflict(task.id.clone()));
        }

        if persist {
            let record = serde_json::to_value(&task)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            self.records.put(TASK_NAMESPACE, &task.id, record).await?;
        }

        let handle = self.spawn_timer(task.clone());
        tracing::info!(task_id = %task.id, name = %task.name, "scheduled task");
        tasks.insert(task.id.clone(), ScheduledTask { task, handle });
        Ok(())
    }

    fn spawn_timer(self: &Arc<Self>, task: Task) -> JoinHandle<()> {
        let bridge: Weak<Self> = Arc::downgrade(self);
        match task.trigger.clone() {
            TaskTrigger::Interval { seconds } => tokio::spawn(async move {
                let period = Duration::from_secs(seconds);
                loop {
                    tokio::time::sleep(period).await;
                    let Some(bridge) = bridge.upgrade() else { break };
                    bridge.fire_interval(&task);
                }
            }),
            TaskTrigger::Once { at } => tokio::spawn(async move {
                let now = chrono::Utc::now();
                if at > now {
                    if let Ok(delay) = (at - now).to_std() {
                        tokio::time::sleep(delay).await;
                    }
                }
                let Some(bridge) = bridge.upgrade() else { return };
                bridge.fire_once(&task.id).await;
            }),
            // Rejected by insert before a timer is ever spawned.
            TaskTrigger::Cron { .. } => tokio::spawn(async {}),
        }
    }

    fn fire_interval(&self, task: &Task) {
        match self.tx.try_send(Ingress::from_task(task)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.coalesced.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    task_id = %task.id,
                    coalesced_total = total,
                    "ingress channel full, coalescing interval fire"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(task_id = %task.id, "ingress channel closed, dropping fire");
            }
        }
    }

    /// Fire a `Once` task. Removing the entry from the task map is the
    /// at-most-once guard: only the caller that wins the removal hands the
    /// fire off. The persisted record is deleted on successful hand-off,
    /// before the chain executes.
    async fn fire_once(&self, task_id: &str) -> bool {
        let removed = { self.tasks.write().await.remove(task_id) };
        let Some(entry) = removed else {
            return false;
        };
        let task = entry.task;

        if self.tx.send(Ingress::from_task(&task)).await.is_err() {
            tracing::error!(task_id = %task.id, "ingress channel closed, dropping one-shot fire");
            return false;
        }
        if let Err(err) = self.records.delete(TASK_NAMESPACE, &task.id).await {
            tracing::error!(task_id = %task.id, error = %err, "failed to delete one-shot task record");
        }
        tracing::info!(task_id = %task.id, "one-shot task handed off");
        true
    }

    /// Fire a task immediately. For `Once` tasks this consumes the task;
    /// the timer fire that follows becomes a no-op.
    pub async fn trigger_now(&self, task_id: &str) -> Result<bool, ScheduleError> {
        let entry = {
            let tasks = self.tasks.read().await;
            tasks.get(task_id).map(|t| t.task.clone())
        };
        let Some(task) = entry else {
            return Ok(false);
        };
        if task.is_once() {
            return Ok(self.fire_once(task_id).await);
        }
        self.fire_interval(&task);
        Ok(true)
    }

    /// Cancel a task: stop its timer and delete the persisted record.
    pub async fn cancel(&self, task_id: &str) -> Result<bool, ScheduleError> {
        let removed = { self.tasks.write().await.remove(task_id) };
        let Some(entry) = removed else {
            return Ok(false);
        };
        entry.handle.abort();
        self.records.delete(TASK_NAMESPACE, task_id).await?;
        tracing::info!(task_id, "cancelled task");
        Ok(true)
    }

    /// Currently scheduled tasks, ordered by id.
    pub async fn list(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks.values().map(|t| t.task.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Number of interval fires skipped because the ingress channel was
    /// full.
    pub fn coalesced_count(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Re-schedule persisted tasks at startup. Unrestorable records are
    /// logged and skipped, never fatal.
    pub async fn restore(self: &Arc<Self>) -> usize {
        let records = match self.records.list(TASK_NAMESPACE).await {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(error = %err, "failed to list persisted tasks");
                return 0;
            }
        };
        let mut restored = 0;
        for (id, value) in records {
            match serde_json::from_value::<Task>(value) {
                Ok(task) => match self.insert(task, false).await {
                    Ok(()) => restored += 1,
                    Err(err) => {
                        tracing::error!(task_id = %id, error = %err, "failed to reschedule task");
                    }
                },
                Err(err) => {
                    tracing::error!(task_id = %id, error = %err, "skipping unrestorable task record");
                }
            }
        }
        restored
    }
}

/// The single consumer of the ingress channel. Runs each fire's chain on
/// its bound thread, or a fresh thread when the task has none.
pub async fn run_ingress(
    mut rx: mpsc::Receiver<Ingress>,
    interpreter: Arc<ChainInterpreter>,
    threads: Arc<dyn ThreadStore>,
    cancel: CancellationToken,
) {
    loop {
        let fire = tokio::select! {
            _ = cancel.cancelled() => break,
            fire = rx.recv() => match fire {
                Some(fire) => fire,
                None => break,
            },
        };

        let thread_id = match &fire.thread_id {
            Some(id) => id.clone(),
            None => {
                match threads
                    .create(Some(format!("task '{}'", fire.name)), HashMap::new())
                    .await
                {
                    Ok(thread) => thread.id,
                    Err(err) => {
                        tracing::error!(task_id = %fire.task_id, error = %err, "failed to create thread for task fire");
                        continue;
                    }
                }
            }
        };

        let token = cancel.child_token();
        match interpreter.execute(&fire.action, &thread_id, &token).await {
            Ok(outcome) => {
                tracing::info!(
                    task_id = %fire.task_id,
                    thread_id = %thread_id,
                    appended = outcome.appended,
                    "task chain finished"
                );
            }
            Err(err) => {
                tracing::error!(
                    task_id = %fire.task_id,
                    thread_id = %thread_id,
                    error = %err,
                    "task chain failed"
                );
            }
        }
    }
}
