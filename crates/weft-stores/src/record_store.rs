//! RecordStore implementations.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use weft_core::store::{RecordStore, StoreError};

/// In-memory implementation for development and testing.
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put(&self, namespace: &str, id: &str, record: Value) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records
            .entry(namespace.to_string())
            .or_default()
            .insert(id.to_string(), record);
        Ok(())
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(namespace)
            .and_then(|ns| ns.get(id))
            .cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let records = self.records.read().await;
        let mut out: Vec<(String, Value)> = records
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        Ok(records
            .get_mut(namespace)
            .map(|ns| ns.remove(id).is_some())
            .unwrap_or(false))
    }
}

/// File-backed implementation: `<dir>/<namespace>/<id>.json` per record,
/// written atomically via temp-file + rename.
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, namespace: &str, id: &str) -> PathBuf {
        self.dir.join(namespace).join(format!("{}.json", id))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn put(&self, namespace: &str, id: &str, record: Value) -> Result<(), StoreError> {
        let path = self.path_for(namespace, id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(&record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(namespace, id);
        match tokio::fs::read(&path).await {
            Ok(payload) => serde_json::from_slice(&payload)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    async fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let ns_dir = self.dir.join(namespace);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&ns_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match tokio::fs::read(&path).await {
                Ok(payload) => match serde_json::from_slice(&payload) {
                    Ok(record) => out.push((id.to_string(), record)),
                    Err(err) => {
                        tracing::error!(path = %path.display(), error = %err, "skipping unreadable record");
                    }
                },
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "failed to read record");
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(namespace, id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_put_get_delete() {
        tokio_test::block_on(async {
            let store = InMemoryRecordStore::new();
            store.put("tasks", "t1", json!({"name": "a"})).await.unwrap();
            store.put("tasks", "t2", json!({"name": "b"})).await.unwrap();
            store.put("hooks", "h1", json!({"pattern": "*"})).await.unwrap();

            assert_eq!(store.get("tasks", "t1").await.unwrap().unwrap()["name"], "a");
            assert!(store.get("tasks", "missing").await.unwrap().is_none());

            let tasks = store.list("tasks").await.unwrap();
            assert_eq!(tasks.len(), 2);
            assert_eq!(tasks[0].0, "t1");

            assert!(store.delete("tasks", "t1").await.unwrap());
            assert!(!store.delete("tasks", "t1").await.unwrap());
            assert_eq!(store.list("tasks").await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_file_store_namespaces_are_isolated() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = FileRecordStore::new(dir.path()).await.unwrap();
            store.put("tasks", "t1", json!({"kind": "task"})).await.unwrap();
            store.put("hooks", "t1", json!({"kind": "hook"})).await.unwrap();

            assert_eq!(store.get("tasks", "t1").await.unwrap().unwrap()["kind"], "task");
            assert_eq!(store.get("hooks", "t1").await.unwrap().unwrap()["kind"], "hook");

            assert!(store.delete("tasks", "t1").await.unwrap());
            assert!(store.get("tasks", "t1").await.unwrap().is_none());
            assert!(store.get("hooks", "t1").await.unwrap().is_some());
        });
    }

    #[test]
    fn test_file_store_list_missing_namespace_is_empty() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = FileRecordStore::new(dir.path()).await.unwrap();
            assert!(store.list("nothing").await.unwrap().is_empty());
        });
    }
}
