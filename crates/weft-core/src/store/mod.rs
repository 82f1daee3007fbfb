//! Store traits.
//!
//! - ThreadStore: the persistent, append-only thread log
//! - RecordStore: minimal keyed persistence for task/hook records
//!
//! Note: Implementations live in the `weft-stores` crate.

mod record_store;
mod thread_store;

pub use record_store::RecordStore;
pub use thread_store::ThreadStore;

use thiserror::Error;

use crate::types::Event;

/// Store error types shared by all backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error("item already exists: {0}")]
    AlreadyExists(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Durable sink for published events. The bus records every publish here
/// as it enters the in-memory history, so the two never diverge.
pub trait HistorySink: Send + Sync {
    fn record(&self, event: &Event) -> Result<(), StoreError>;
}
