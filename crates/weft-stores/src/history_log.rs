//! JSONL persistence for bus history.
//!
//! One event per line. The log is append-only; replay reads the whole file
//! and skips lines that no longer parse rather than failing startup.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use weft_core::store::{HistorySink, StoreError};
use weft_core::types::Event;

pub struct JsonlHistoryLog {
    path: PathBuf,
}

impl JsonlHistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one event as a JSON line.
    pub fn append(&self, event: &Event) -> Result<(), StoreError> {
        let line = serde_json::to_string(event)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        writeln!(file, "{}", line).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Read every event in append order. A missing file is an empty log;
    /// unparseable lines are logged and skipped.
    pub fn load(&self) -> Result<Vec<Event>, StoreError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        let mut events = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StoreError::Io(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(err) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = number + 1,
                        error = %err,
                        "skipping unparseable history line"
                    );
                }
            }
        }
        Ok(events)
    }
}

impl HistorySink for JsonlHistoryLog {
    fn record(&self, event: &Event) -> Result<(), StoreError> {
        self.append(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlHistoryLog::new(dir.path().join("history.jsonl"));

        log.append(&Event::new("a.first", json!({"n": 1}))).unwrap();
        log.append(&Event::new("b.second", json!({"n": 2}))).unwrap();

        let events = log.load().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "a.first");
        assert_eq!(events[1].event_type, "b.second");
    }

    #[test]
    fn test_missing_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlHistoryLog::new(dir.path().join("never-written.jsonl"));
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let log = JsonlHistoryLog::new(&path);
        log.append(&Event::new("a.first", json!({}))).unwrap();
        std::fs::write(
            &path,
            format!(
                "{}\nnot json at all\n",
                serde_json::to_string(&Event::new("a.first", json!({}))).unwrap()
            ),
        )
        .unwrap();

        let events = log.load().unwrap();
        assert_eq!(events.len(), 1);
    }
}
