//! ThreadStore trait.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use super::StoreError;
use crate::types::{Thread, ThreadRecord, ThreadStatus};

/// Persistence for threads.
///
/// Only the chain interpreter calls [`append`](ThreadStore::append); every
/// other component reads through [`load`](ThreadStore::load). Appends to the
/// same thread are serialized by the interpreter (single-writer rule);
/// appends to different threads may proceed independently.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Create and persist a new thread. The store records a `thread.created`
    /// event as the first entry of the log.
    async fn create(
        &self,
        summary: Option<String>,
        metadata: HashMap<String, Value>,
    ) -> Result<Thread, StoreError>;

    /// Atomically append a record and bump `updated_at`.
    async fn append(&self, thread_id: &str, record: ThreadRecord) -> Result<(), StoreError>;

    /// Load a thread by id.
    async fn load(&self, thread_id: &str) -> Result<Thread, StoreError>;

    /// List threads, optionally filtered by status, most recently updated
    /// first.
    async fn list(&self, status: Option<ThreadStatus>) -> Result<Vec<Thread>, StoreError>;

    /// Close a thread with a final status.
    async fn close(&self, thread_id: &str, final_status: ThreadStatus) -> Result<(), StoreError>;

    /// Set a thread's status without closing it (e.g. Active -> Waiting).
    async fn set_status(&self, thread_id: &str, status: ThreadStatus) -> Result<(), StoreError>;

    /// Keyword search over summaries and recent record results.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Thread>, StoreError>;
}
