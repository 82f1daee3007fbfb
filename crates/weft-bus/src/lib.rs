//! # Weft Bus
//!
//! The event registry / bus:
//! - handler subscriptions with per-event-type parameter schemas
//! - schema validation with one repair retry through the decision capability
//! - concurrent handler dispatch with per-handler failure isolation
//! - append-ordered, bounded publish history
//! - pre/post hook integration with the `source = "hook"` re-entrancy guard

mod bus;
mod history;

pub use bus::{
    BusConfig, BusError, EventBus, EventHandler, FnHandler, HandlerError, HandlerOutcome,
    HookRunner, PublishResult,
};
pub use history::EventHistory;
