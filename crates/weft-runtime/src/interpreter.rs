//! ChainInterpreter - walks a chain against exactly one thread.
//!
//! Per step: consult the decision capability when the step carries a
//! `decide` condition, interpolate parameters against the thread's records
//! plus earlier same-chain results, publish (or fan out and join for a
//! parallel group), and append the outcome to the thread. The thread is
//! owned exclusively for the duration of the execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use weft_bus::EventBus;
use weft_core::capability::{Decider, DecisionAction, DecisionRequest};
use weft_core::interpolate::{self, InterpolationContext, InterpolationError};
use weft_core::store::{StoreError, ThreadStore};
use weft_core::types::{
    ChainSpec, ChainStep, Event, Hook, InvokeStep, ThreadRecord, ThreadStatus, HOOK_SOURCE,
    SYSTEM_SOURCE,
};

/// Interpreter settings, sourced from the `runtime` config section.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Per-step timeout; exceeding it is a step failure.
    pub step_timeout: Option<Duration>,
    /// Whole-chain timeout.
    pub chain_timeout: Option<Duration>,
    /// Prefix for the ephemeral threads hook chains run against.
    pub scratch_thread_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            step_timeout: None,
            chain_timeout: None,
            scratch_thread_prefix: "scratch".to_string(),
        }
    }
}

/// Chain execution errors.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    /// An unrecoverable step failure. A failure marker has already been
    /// appended to the thread and the thread set to Waiting.
    #[error("chain aborted at '{event_type}'")]
    Abort { event_type: String, detail: Value },

    #[error("chain cancelled between steps")]
    Cancelled,

    #[error("chain timed out")]
    Timeout,

    #[error("thread '{0}' is closed")]
    ThreadClosed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a completed execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainDisposition {
    /// Every step was executed or skipped.
    Completed,
    /// A `decide` condition requested `break`; remaining steps were not
    /// executed and the thread was set to Waiting.
    Broke { reason: Option<String> },
}

/// Result of a successful (non-aborted) execution.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub thread_id: String,
    /// Records appended to the thread by this execution.
    pub appended: usize,
    pub disposition: ChainDisposition,
}

/// Gate verdict for one invocation, before it is published.
enum Gate {
    Run(Value),
    Skip(Option<String>),
    Break(Option<String>),
    Fail(Value),
}

enum StepResult {
    Done(Value),
    Failed(Value),
}

enum MemberPlan {
    Run(Value),
    Skip,
    Failed(Value),
}

pub struct ChainInterpreter {
    bus: Arc<EventBus>,
    threads: Arc<dyn ThreadStore>,
    decider: Arc<dyn Decider>,
    config: RuntimeConfig,
}

impl ChainInterpreter {
    pub fn new(
        bus: Arc<EventBus>,
        threads: Arc<dyn ThreadStore>,
        decider: Arc<dyn Decider>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            bus,
            threads,
            decider,
            config,
        }
    }

    /// Execute a chain against a thread with the default `system` source.
    pub async fn execute(
        &self,
        chain: &ChainSpec,
        thread_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ChainOutcome, ChainError> {
        self.execute_as(chain, thread_id, SYSTEM_SOURCE, cancel).await
    }

    /// Execute a chain with an explicit event source for every publish.
    pub async fn execute_as(
        &self,
        chain: &ChainSpec,
        thread_id: &str,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<ChainOutcome, ChainError> {
        let thread = self.threads.load(thread_id).await?;
        if thread.status.is_terminal() {
            return Err(ChainError::ThreadClosed(thread_id.to_string()));
        }
        if thread.status == ThreadStatus::Waiting {
            self.threads
                .set_status(thread_id, ThreadStatus::Active)
                .await?;
        }
        tracing::info!(thread_id, steps = chain.len(), source, "executing chain");

        let mut ctx = InterpolationContext::new();
        ctx.insert("thread_id", json!(thread.id));
        for (key, value) in &thread.metadata {
            ctx.insert(key.clone(), value.clone());
        }
        for record in &thread.events {
            if !record.is_failure() {
                ctx.add_result(&record.event, &record.result);
            }
        }

        let run = self.run_steps(chain, thread_id, source, cancel, ctx);
        match self.config.chain_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(thread_id, "chain timed out");
                    self.threads
                        .set_status(thread_id, ThreadStatus::Waiting)
                        .await?;
                    Err(ChainError::Timeout)
                }
            },
            None => run.await,
        }
    }

    /// Run a hook's chain against a fresh scratch thread. The thread is
    /// archived afterwards; results are discarded.
    pub async fn run_hook_chain(&self, hook: &Hook, trigger: &Event) -> Result<(), ChainError> {
        let mut metadata = HashMap::new();
        metadata.insert(
            "trigger".to_string(),
            json!({
                "event_type": trigger.event_type,
                "data": trigger.data,
                "source": trigger.source,
            }),
        );
        let thread = self
            .threads
            .create(
                Some(format!(
                    "{} hook '{}'",
                    self.config.scratch_thread_prefix, hook.name
                )),
                metadata,
            )
            .await?;

        let cancel = CancellationToken::new();
        let outcome = self
            .execute_as(&hook.action, &thread.id, HOOK_SOURCE, &cancel)
            .await;

        if let Err(err) = self.threads.close(&thread.id, ThreadStatus::Archived).await {
            tracing::warn!(thread_id = %thread.id, error = %err, "failed to archive scratch thread");
        }
        outcome.map(|_| ())
    }

    async fn run_steps(
        &self,
        chain: &ChainSpec,
        thread_id: &str,
        source: &str,
        cancel: &CancellationToken,
        mut ctx: InterpolationContext,
    ) -> Result<ChainOutcome, ChainError> {
        let mut appended = 0usize;

        for step in &chain.steps {
            // Cancellation is observed at step boundaries only.
            if cancel.is_cancelled() {
                self.threads
                    .set_status(thread_id, ThreadStatus::Waiting)
                    .await?;
                return Err(ChainError::Cancelled);
            }

            match step {
                ChainStep::Invoke(invoke) => {
                    match self
                        .run_single(invoke, thread_id, source, &mut ctx, &mut appended)
                        .await?
                    {
                        None => {}
                        Some(reason) => {
                            self.threads
                                .set_status(thread_id, ThreadStatus::Waiting)
                                .await?;
                            return Ok(ChainOutcome {
                                thread_id: thread_id.to_string(),
                                appended,
                                disposition: ChainDisposition::Broke { reason },
                            });
                        }
                    }
                }
                ChainStep::Parallel(members) => {
                    if let Some(reason) = self
                        .run_parallel(members, thread_id, source, &mut ctx, &mut appended)
                        .await?
                    {
                        self.threads
                            .set_status(thread_id, ThreadStatus::Waiting)
                            .await?;
                        return Ok(ChainOutcome {
                            thread_id: thread_id.to_string(),
                            appended,
                            disposition: ChainDisposition::Broke { reason },
                        });
                    }
                }
            }
        }

        Ok(ChainOutcome {
            thread_id: thread_id.to_string(),
            appended,
            disposition: ChainDisposition::Completed,
        })
    }

    /// Run one sequential invocation. Returns `Some(reason)` when the step
    /// requested a break.
    async fn run_single(
        &self,
        invoke: &InvokeStep,
        thread_id: &str,
        source: &str,
        ctx: &mut InterpolationContext,
        appended: &mut usize,
    ) -> Result<Option<Option<String>>, ChainError> {
        match self.gate_invoke(invoke, ctx).await {
            Err(interp) => {
                let detail = json!({"error": interp.to_string()});
                self.threads
                    .append(thread_id, ThreadRecord::failure(&invoke.event, detail))
                    .await?;
                self.threads
                    .set_status(thread_id, ThreadStatus::Waiting)
                    .await?;
                Err(interp.into())
            }
            Ok(Gate::Skip(reason)) => {
                tracing::debug!(event_type = %invoke.event, ?reason, "step skipped");
                Ok(None)
            }
            Ok(Gate::Break(reason)) => Ok(Some(reason)),
            Ok(Gate::Fail(error)) => {
                self.abort_step(thread_id, &invoke.event, error).await
            }
            Ok(Gate::Run(params)) => {
                match self.publish_step(&invoke.event, params.clone(), source).await {
                    StepResult::Done(result) => {
                        let record =
                            ThreadRecord::new(&invoke.event, result.clone()).with_params(params);
                        self.threads.append(thread_id, record).await?;
                        ctx.add_result(&invoke.event, &result);
                        *appended += 1;
                        Ok(None)
                    }
                    StepResult::Failed(error) => {
                        self.abort_step(thread_id, &invoke.event, error).await
                    }
                }
            }
        }
    }

    async fn abort_step(
        &self,
        thread_id: &str,
        event_type: &str,
        error: Value,
    ) -> Result<Option<Option<String>>, ChainError> {
        tracing::error!(thread_id, event_type, "step failed, aborting chain");
        self.threads
            .append(thread_id, ThreadRecord::failure(event_type, error.clone()))
            .await?;
        self.threads
            .set_status(thread_id, ThreadStatus::Waiting)
            .await?;
        Err(ChainError::Abort {
            event_type: event_type.to_string(),
            detail: error,
        })
    }

    /// Run a parallel group: gate every member against the join-boundary
    /// context, dispatch the runnable ones concurrently, join, then append
    /// results in member order. Member failures are isolated; the chain
    /// aborts only when every non-skipped member failed. Returns
    /// `Some(reason)` when a member requested a break; already-dispatched
    /// siblings are never cancelled.
    async fn run_parallel(
        &self,
        members: &[InvokeStep],
        thread_id: &str,
        source: &str,
        ctx: &mut InterpolationContext,
        appended: &mut usize,
    ) -> Result<Option<Option<String>>, ChainError> {
        let mut plans: Vec<MemberPlan> = Vec::with_capacity(members.len());
        let mut break_reason: Option<Option<String>> = None;

        for member in members {
            let plan = match self.gate_invoke(member, ctx).await {
                Ok(Gate::Run(params)) => MemberPlan::Run(params),
                Ok(Gate::Skip(reason)) => {
                    tracing::debug!(event_type = %member.event, ?reason, "member skipped");
                    MemberPlan::Skip
                }
                Ok(Gate::Break(reason)) => {
                    if break_reason.is_none() {
                        break_reason = Some(reason);
                    }
                    MemberPlan::Skip
                }
                Ok(Gate::Fail(error)) => MemberPlan::Failed(error),
                // Interpolation failure in one member does not block its
                // siblings.
                Err(interp) => MemberPlan::Failed(json!({"error": interp.to_string()})),
            };
            plans.push(plan);
        }

        let runs: Vec<(usize, Value)> = plans
            .iter()
            .enumerate()
            .filter_map(|(i, plan)| match plan {
                MemberPlan::Run(params) => Some((i, params.clone())),
                _ => None,
            })
            .collect();

        let dispatched = join_all(runs.into_iter().map(|(i, params)| {
            let event_type = members[i].event.clone();
            async move {
                let outcome = self
                    .publish_step(&event_type, params.clone(), source)
                    .await;
                (i, params, outcome)
            }
        }))
        .await;

        let mut slots: Vec<Option<(Value, StepResult)>> =
            members.iter().map(|_| None).collect();
        for (i, params, outcome) in dispatched {
            slots[i] = Some((params, outcome));
        }

        let mut ran = 0usize;
        let mut failed = 0usize;
        let mut failure_detail = Map::new();
        for (i, member) in members.iter().enumerate() {
            match &plans[i] {
                MemberPlan::Skip => {}
                MemberPlan::Failed(error) => {
                    self.threads
                        .append(thread_id, ThreadRecord::failure(&member.event, error.clone()))
                        .await?;
                    failure_detail.insert(member.event.clone(), error.clone());
                    *appended += 1;
                    ran += 1;
                    failed += 1;
                }
                MemberPlan::Run(_) => {
                    if let Some((params, outcome)) = slots[i].take() {
                        ran += 1;
                        match outcome {
                            StepResult::Done(result) => {
                                let record = ThreadRecord::new(&member.event, result.clone())
                                    .with_params(params);
                                self.threads.append(thread_id, record).await?;
                                ctx.add_result(&member.event, &result);
                                *appended += 1;
                            }
                            StepResult::Failed(error) => {
                                tracing::error!(
                                    thread_id,
                                    event_type = %member.event,
                                    "parallel member failed"
                                );
                                self.threads
                                    .append(
                                        thread_id,
                                        ThreadRecord::failure(&member.event, error.clone()),
                                    )
                                    .await?;
                                failure_detail.insert(member.event.clone(), error);
                                *appended += 1;
                                failed += 1;
                            }
                        }
                    }
                }
            }
        }

        if ran > 0 && failed == ran {
            let event_type = members
                .first()
                .map(|m| m.event.clone())
                .unwrap_or_default();
            self.threads
                .set_status(thread_id, ThreadStatus::Waiting)
                .await?;
            return Err(ChainError::Abort {
                event_type,
                detail: json!({"failed_members": failure_detail}),
            });
        }

        Ok(break_reason)
    }

    /// Evaluate the `decide` gate (against raw parameters) and interpolate.
    async fn gate_invoke(
        &self,
        step: &InvokeStep,
        ctx: &InterpolationContext,
    ) -> Result<Gate, InterpolationError> {
        let mut params = step.params.clone();
        if let Some(condition) = &step.decide {
            let request =
                DecisionRequest::condition(step.event.as_str(), params.clone(), condition.as_str());
            match self.decider.decide(request).await {
                Ok(decision) => match decision.action {
                    DecisionAction::Continue => {
                        if let Some(adjusted) = decision.params {
                            params = adjusted;
                        }
                    }
                    DecisionAction::Skip => return Ok(Gate::Skip(decision.reason)),
                    DecisionAction::Break => return Ok(Gate::Break(decision.reason)),
                },
                Err(err) => {
                    return Ok(Gate::Fail(json!({"error": err.to_string()})));
                }
            }
        }
        let resolved = interpolate::resolve(&params, ctx)?;
        Ok(Gate::Run(resolved))
    }

    /// Publish one event with the step timeout applied and collapse the
    /// per-handler outcomes into a step result.
    async fn publish_step(&self, event_type: &str, params: Value, source: &str) -> StepResult {
        let publish = self.bus.publish(event_type, params, source);
        let published = match self.config.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, publish).await {
                Ok(published) => published,
                Err(_) => {
                    return StepResult::Failed(
                        json!({"error": format!("step timed out after {:?}", limit)}),
                    );
                }
            },
            None => publish.await,
        };

        match published {
            Ok(result) if result.all_failed() => {
                let mut failures = Map::new();
                for (name, message) in result.failures() {
                    failures.insert(name.to_string(), json!(message));
                }
                StepResult::Failed(json!({"failed_handlers": failures}))
            }
            Ok(result) => StepResult::Done(result.aggregated()),
            Err(err) => StepResult::Failed(json!({"error": err.to_string()})),
        }
    }
}
