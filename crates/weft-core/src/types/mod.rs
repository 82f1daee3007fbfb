//! Domain types for the weft engine.

mod chain;
mod event;
mod hook;
mod task;
mod thread;

pub use chain::{ChainSpec, ChainStep, InvokeStep};
pub use event::Event;
pub use hook::{Hook, HookPosition};
pub use task::{Task, TaskStatus, TaskTrigger};
pub use thread::{Thread, ThreadId, ThreadRecord, ThreadStatus};

/// Distinguished event source for hook-originated publishes.
///
/// The bus never matches hook patterns against events carrying this source.
/// This is the re-entrancy guard: without it a hook whose pattern matches its
/// own action's events would recurse forever.
pub const HOOK_SOURCE: &str = "hook";

/// Default source for events published without an explicit origin.
pub const SYSTEM_SOURCE: &str = "system";
