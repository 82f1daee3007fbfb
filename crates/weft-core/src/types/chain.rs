//! ChainSpec - declarative chains of event invocations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event invocation within a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeStep {
    /// Event type to publish.
    pub event: String,
    /// Parameters, possibly containing `{namespace.path}` references.
    #[serde(default)]
    pub params: Value,
    /// Optional precondition evaluated by the decision capability before
    /// the step executes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decide: Option<String>,
}

impl InvokeStep {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            params: Value::Null,
            decide: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_decide(mut self, condition: impl Into<String>) -> Self {
        self.decide = Some(condition.into());
        self
    }
}

/// A chain step: a single invocation or a parallel group with an implicit
/// join before the next step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainStep {
    Invoke(InvokeStep),
    Parallel(Vec<InvokeStep>),
}

impl ChainStep {
    /// Event types named by this step, in member order.
    pub fn event_types(&self) -> Vec<&str> {
        match self {
            ChainStep::Invoke(step) => vec![step.event.as_str()],
            ChainStep::Parallel(members) => members.iter().map(|m| m.event.as_str()).collect(),
        }
    }
}

/// An ordered sequence of steps, always executed against exactly one thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainSpec {
    pub steps: Vec<ChainStep>,
}

impl ChainSpec {
    pub fn new(steps: Vec<ChainStep>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Start building a chain.
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }
}

/// Helper to assemble chains programmatically.
#[derive(Debug, Default)]
pub struct ChainBuilder {
    steps: Vec<ChainStep>,
}

impl ChainBuilder {
    /// Append a single invocation.
    pub fn invoke(mut self, step: InvokeStep) -> Self {
        self.steps.push(ChainStep::Invoke(step));
        self
    }

    /// Append a parallel group; members run concurrently and join before
    /// the next step.
    pub fn parallel(mut self, members: Vec<InvokeStep>) -> Self {
        self.steps.push(ChainStep::Parallel(members));
        self
    }

    pub fn build(self) -> ChainSpec {
        ChainSpec { steps: self.steps }
    }
}
