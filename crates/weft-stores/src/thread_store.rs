//! ThreadStore implementations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use weft_core::store::{StoreError, ThreadStore};
use weft_core::types::{Thread, ThreadRecord, ThreadStatus};

/// How many trailing records a keyword search inspects per thread.
const SEARCH_RECORD_WINDOW: usize = 20;

fn generate_thread_id() -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!("thread_{}_{}", stamp, &short[..6])
}

fn default_summary() -> String {
    format!("Thread created at {}", Utc::now().format("%Y-%m-%d %H:%M"))
}

fn creation_record(thread: &Thread) -> ThreadRecord {
    ThreadRecord::new(
        "thread.created",
        serde_json::json!({"thread_id": thread.id, "summary": thread.summary}),
    )
}

fn matches_query(thread: &Thread, query: &str) -> bool {
    if thread.summary.to_lowercase().contains(query) {
        return true;
    }
    thread
        .events
        .iter()
        .rev()
        .take(SEARCH_RECORD_WINDOW)
        .any(|record| {
            serde_json::to_string(&record.result)
                .map(|s| s.to_lowercase().contains(query))
                .unwrap_or(false)
        })
}

/// In-memory implementation for development and testing.
pub struct InMemoryThreadStore {
    threads: RwLock<HashMap<String, Thread>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryThreadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn create(
        &self,
        summary: Option<String>,
        metadata: HashMap<String, Value>,
    ) -> Result<Thread, StoreError> {
        let mut threads = self.threads.write().await;
        let mut thread = Thread::with_id(
            generate_thread_id(),
            summary.unwrap_or_else(default_summary),
        )
        .with_metadata(metadata);
        if threads.contains_key(&thread.id) {
            return Err(StoreError::AlreadyExists(thread.id));
        }
        thread.push_record(creation_record(&thread));
        threads.insert(thread.id.clone(), thread.clone());
        tracing::info!(thread_id = %thread.id, "created thread");
        Ok(thread)
    }

    async fn append(&self, thread_id: &str, record: ThreadRecord) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))?;
        thread.push_record(record);
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Thread, StoreError> {
        let threads = self.threads.read().await;
        threads
            .get(thread_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))
    }

    async fn list(&self, status: Option<ThreadStatus>) -> Result<Vec<Thread>, StoreError> {
        let threads = self.threads.read().await;
        let mut out: Vec<Thread> = threads
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn close(&self, thread_id: &str, final_status: ThreadStatus) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))?;
        thread.status = final_status;
        thread.updated_at = Utc::now();
        Ok(())
    }

    // Bare status transitions leave updated_at alone: only appends and
    // close move it.
    async fn set_status(&self, thread_id: &str, status: ThreadStatus) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))?;
        thread.status = status;
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Thread>, StoreError> {
        let query = query.to_lowercase();
        let all = self.list(None).await?;
        Ok(all
            .into_iter()
            .filter(|t| matches_query(t, &query))
            .take(limit)
            .collect())
    }
}

/// File-backed implementation: one JSON document per thread.
///
/// Appends rewrite the whole document through a temp file and rename, so a
/// crashed write never leaves a truncated thread on disk. A write-through
/// cache avoids re-reading hot threads.
pub struct FileThreadStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Thread>>>,
}

impl FileThreadStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", thread_id))
    }

    async fn write_thread(&self, thread: &Thread) -> Result<(), StoreError> {
        let path = self.path_for(&thread.id);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(thread)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn read_thread(&self, thread_id: &str) -> Result<Thread, StoreError> {
        let path = self.path_for(thread_id);
        let payload = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(thread_id.to_string())
            } else {
                StoreError::Io(e.to_string())
            }
        })?;
        serde_json::from_slice(&payload).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn load_mut(&self, thread_id: &str) -> Result<Thread, StoreError> {
        {
            let cache = self.cache.read().await;
            if let Some(thread) = cache.get(thread_id) {
                return Ok(Thread::clone(thread));
            }
        }
        self.read_thread(thread_id).await
    }

    async fn store(&self, thread: Thread) -> Result<(), StoreError> {
        self.write_thread(&thread).await?;
        let mut cache = self.cache.write().await;
        cache.insert(thread.id.clone(), Arc::new(thread));
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for FileThreadStore {
    async fn create(
        &self,
        summary: Option<String>,
        metadata: HashMap<String, Value>,
    ) -> Result<Thread, StoreError> {
        let mut thread = Thread::with_id(
            generate_thread_id(),
            summary.unwrap_or_else(default_summary),
        )
        .with_metadata(metadata);

        if tokio::fs::try_exists(self.path_for(&thread.id))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            return Err(StoreError::AlreadyExists(thread.id));
        }

        thread.push_record(creation_record(&thread));
        self.store(thread.clone()).await?;
        tracing::info!(thread_id = %thread.id, "created thread");
        Ok(thread)
    }

    async fn append(&self, thread_id: &str, record: ThreadRecord) -> Result<(), StoreError> {
        let mut thread = self.load_mut(thread_id).await?;
        thread.push_record(record);
        self.store(thread).await
    }

    async fn load(&self, thread_id: &str) -> Result<Thread, StoreError> {
        self.load_mut(thread_id).await
    }

    async fn list(&self, status: Option<ThreadStatus>) -> Result<Vec<Thread>, StoreError> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let payload = match tokio::fs::read(&path).await {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "failed to read thread file");
                    continue;
                }
            };
            match serde_json::from_slice::<Thread>(&payload) {
                Ok(thread) => {
                    if status.map_or(true, |s| thread.status == s) {
                        out.push(thread);
                    }
                }
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "skipping unreadable thread file");
                }
            }
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn close(&self, thread_id: &str, final_status: ThreadStatus) -> Result<(), StoreError> {
        let mut thread = self.load_mut(thread_id).await?;
        thread.status = final_status;
        thread.updated_at = Utc::now();
        self.write_thread(&thread).await?;
        // Drop closed threads from the cache.
        let mut cache = self.cache.write().await;
        cache.remove(thread_id);
        Ok(())
    }

    // Bare status transitions leave updated_at alone: only appends and
    // close move it.
    async fn set_status(&self, thread_id: &str, status: ThreadStatus) -> Result<(), StoreError> {
        let mut thread = self.load_mut(thread_id).await?;
        thread.status = status;
        self.store(thread).await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Thread>, StoreError> {
        let query = query.to_lowercase();
        let all = self.list(None).await?;
        Ok(all
            .into_iter()
            .filter(|t| matches_query(t, &query))
            .take(limit)
            .collect())
    }
}
