//! RecordStore trait - minimal keyed persistence.

use async_trait::async_trait;
use serde_json::Value;

use super::StoreError;

/// Keyed JSON record persistence used by the task and hook registries.
///
/// Records are grouped by `namespace` (e.g. `"tasks"`, `"hooks"`); the core
/// mandates no particular encoding beyond JSON values.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace a record.
    async fn put(&self, namespace: &str, id: &str, record: Value) -> Result<(), StoreError>;

    /// Fetch a record by id.
    async fn get(&self, namespace: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// All records in a namespace as `(id, record)` pairs.
    async fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Delete a record; returns whether it existed.
    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, StoreError>;
}
