//! # Weft Core
//!
//! Domain types and seams for the weft event chain engine:
//! - Event, ChainSpec, Thread, Task, Hook types
//! - Parameter interpolation over accumulated step results
//! - Store traits (ThreadStore, RecordStore)
//! - External capability traits (Decider, ChainPlanner)
//!
//! Note: Implementations of the store traits live in `weft-stores`;
//! the bus and interpreter live in `weft-bus` and `weft-runtime`.

pub mod capability;
pub mod interpolate;
pub mod schema;
pub mod store;
pub mod types;

pub use capability::{
    CapabilityError, ChainPlanner, Decider, Decision, DecisionAction, DecisionRequest, NullDecider,
};
pub use interpolate::{InterpolationContext, InterpolationError};
pub use schema::{FieldSpec, JsonKind, ParamSchema, SchemaViolation};
pub use store::{HistorySink, RecordStore, StoreError, ThreadStore};
pub use types::{
    ChainSpec, ChainStep, Event, Hook, HookPosition, InvokeStep, Task, TaskStatus, TaskTrigger,
    Thread, ThreadId, ThreadRecord, ThreadStatus,
};
