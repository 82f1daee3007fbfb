//! # Weft Stores
//!
//! Store implementations for the weft engine:
//! - InMemory / file-backed ThreadStore
//! - InMemory / file-backed RecordStore
//! - JSONL event history log for startup replay
//!
//! The file backends keep one JSON document per thread or record and write
//! atomically via temp-file + rename.

mod history_log;
mod record_store;
mod thread_store;

pub use history_log::JsonlHistoryLog;
pub use record_store::{FileRecordStore, InMemoryRecordStore};
pub use thread_store::{FileThreadStore, InMemoryThreadStore};

// Re-export core traits for convenience
pub use weft_core::store::{RecordStore, StoreError, ThreadStore};
