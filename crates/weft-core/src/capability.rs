//! External capability traits.
//!
//! The engine treats decision making and chain planning as opaque
//! collaborators: it invokes them through these seams and never reaches
//! into their internals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::schema::SchemaViolation;
use crate::types::ChainSpec;

/// Outcome of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    /// Proceed, possibly with adjusted params.
    Continue,
    /// Omit this step and advance.
    Skip,
    /// Terminate the chain immediately.
    Break,
}

/// A decision returned by the external capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    /// Replacement or repaired parameters, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn proceed() -> Self {
        Self {
            action: DecisionAction::Continue,
            params: None,
            reason: None,
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Skip,
            params: None,
            reason: Some(reason.into()),
        }
    }
}

/// What the capability is being asked about: a step precondition or a
/// schema repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub event_type: String,
    /// Current (possibly partial or invalid) parameters.
    pub params: Value,
    /// Step condition text, when evaluating a `decide` precondition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Schema violations, when asked to repair a payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<SchemaViolation>,
}

impl DecisionRequest {
    pub fn condition(event_type: impl Into<String>, params: Value, condition: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            params,
            condition: Some(condition.into()),
            violations: Vec::new(),
        }
    }

    pub fn repair(
        event_type: impl Into<String>,
        params: Value,
        violations: Vec<SchemaViolation>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            params,
            condition: None,
            violations,
        }
    }
}

/// Capability errors.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("decision failed: {0}")]
    Decision(String),

    #[error("planning failed: {0}")]
    Planning(String),
}

/// Decision/repair capability, invoked by the interpreter for step
/// conditions and by the bus for schema repair.
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, CapabilityError>;
}

/// Decider that always proceeds unchanged. Used when no external decision
/// capability is wired in.
pub struct NullDecider;

#[async_trait]
impl Decider for NullDecider {
    async fn decide(&self, _request: DecisionRequest) -> Result<Decision, CapabilityError> {
        Ok(Decision::proceed())
    }
}

/// Chain-planning capability: turns a natural-language plan into a
/// [`ChainSpec`]. Invoked once per user-originated chain by the entry
/// router, never by the core itself.
#[async_trait]
pub trait ChainPlanner: Send + Sync {
    async fn plan(&self, intent: &str) -> Result<ChainSpec, CapabilityError>;
}
