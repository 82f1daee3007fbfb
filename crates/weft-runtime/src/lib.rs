//! # Weft Runtime
//!
//! The execution layer of the weft engine:
//!
//! - [`ChainInterpreter`] walks a [`ChainSpec`](weft_core::ChainSpec) step
//!   by step against exactly one thread: decide, interpolate, publish,
//!   append.
//! - [`HookRegistry`] and [`ChainHookRunner`] run pattern-matched chains
//!   around bus publishes.
//! - [`SchedulerBridge`] owns timer tasks and funnels every fire through a
//!   bounded ingress channel into the interpreter's execution context.
//! - [`Engine`] wires the whole thing together from a
//!   [`WeftConfig`](weft_config::WeftConfig).

mod bootstrap;
mod hooks;
mod interpreter;
mod manage;
mod scheduler;

pub use bootstrap::{Engine, EngineError};
pub use hooks::{ChainHookRunner, HookRegistry};
pub use interpreter::{ChainDisposition, ChainError, ChainInterpreter, ChainOutcome, RuntimeConfig};
pub use manage::register_management;
pub use scheduler::{run_ingress, Ingress, ScheduleError, SchedulerBridge};
