//! JSON-lines file event store.
//!
//! One record per line, appended in id order. Every append is flushed with
//! `sync_all` before it is acknowledged, so an `Ok` from `append` means the
//! record survives a crash. On open the whole file is read back to rebuild the
//! read index and the next id.
//!
//! A failed write is truncated away before the error is returned, so the file
//! never holds a torn line and the id is free for the next append. If that
//! truncation fails too, the store refuses further appends until reopened.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::instrument;

use super::r#trait::{EventFilter, EventStore, EventStoreError, NewEvent, StoredEventRecord};

#[derive(Debug)]
struct LogState {
    file: File,
    records: Vec<StoredEventRecord>,
    /// Set when a failed append could not be rolled back.
    broken: Option<String>,
}

/// Append-only event store backed by a single `.jsonl` file.
#[derive(Debug)]
pub struct FileEventStore {
    path: PathBuf,
    state: Mutex<LogState>,
}

fn io_error(op: &str, path: &Path, err: std::io::Error) -> EventStoreError {
    EventStoreError::Persistence(format!("{op} {}: {err}", path.display()))
}

impl FileEventStore {
    /// Open (or create) the log at `path`.
    #[instrument(err)]
    pub fn open(path: impl AsRef<Path> + core::fmt::Debug) -> Result<Self, EventStoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_error("create dir for", &path, e))?;
        }

        let records = if path.exists() {
            Self::load(&path)?
        } else {
            Vec::new()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error("open", &path, e))?;

        tracing::info!(records = records.len(), "event log opened");

        Ok(Self {
            path,
            state: Mutex::new(LogState {
                file,
                records,
                broken: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        let file = File::open(path).map_err(|e| io_error("open", path, e))?;
        let mut records: Vec<StoredEventRecord> = Vec::new();

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| io_error("read", path, e))?;
            if line.trim().is_empty() {
                continue;
            }

            let record: StoredEventRecord = serde_json::from_str(&line).map_err(|e| {
                EventStoreError::Serialization(format!(
                    "{} line {}: {e}",
                    path.display(),
                    idx + 1
                ))
            })?;

            if let Some(last) = records.last() {
                if record.id <= last.id {
                    return Err(EventStoreError::Serialization(format!(
                        "{} line {}: non-monotonic id (last={}, found={})",
                        path.display(),
                        idx + 1,
                        last.id,
                        record.id
                    )));
                }
            }
            records.push(record);
        }

        Ok(records)
    }

    /// Undo a partial append by cutting the file back to `len`.
    fn roll_back(&self, state: &mut LogState, len: u64, cause: std::io::Error) -> EventStoreError {
        match state.file.set_len(len) {
            Ok(()) => io_error("append to", &self.path, cause),
            Err(truncate) => {
                let reason = format!(
                    "{}: append failed ({cause}) and could not be rolled back ({truncate})",
                    self.path.display()
                );
                tracing::error!(%reason, "event log left in an unknown state");
                state.broken = Some(reason.clone());
                EventStoreError::Persistence(reason)
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LogState>, EventStoreError> {
        self.state
            .lock()
            .map_err(|_| EventStoreError::Persistence("lock poisoned".to_string()))
    }
}

impl EventStore for FileEventStore {
    #[instrument(skip(self, event), fields(event_type = %event.event_type), err)]
    fn append(&self, event: NewEvent) -> Result<StoredEventRecord, EventStoreError> {
        let mut state = self.lock()?;
        if let Some(reason) = &state.broken {
            return Err(EventStoreError::Persistence(reason.clone()));
        }

        let id = state.records.last().map(|r| r.id).unwrap_or(0) + 1;
        let stored = StoredEventRecord::from_new(id, Utc::now(), event);

        let mut line = serde_json::to_vec(&stored)
            .map_err(|e| EventStoreError::Serialization(format!("record {id}: {e}")))?;
        line.push(b'\n');

        let len = state
            .file
            .metadata()
            .map_err(|e| io_error("stat", &self.path, e))?
            .len();
        let written = state
            .file
            .write_all(&line)
            .and_then(|()| state.file.sync_all());
        if let Err(e) = written {
            return Err(self.roll_back(&mut state, len, e));
        }

        state.records.push(stored.clone());
        Ok(stored)
    }

    fn get(&self, id: u64) -> Result<StoredEventRecord, EventStoreError> {
        let state = self.lock()?;
        state
            .records
            .binary_search_by_key(&id, |r| r.id)
            .map(|idx| state.records[idx].clone())
            .map_err(|_| EventStoreError::NotFound(id))
    }

    fn read_page(
        &self,
        after_id: u64,
        limit: usize,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        let state = self.lock()?;
        let start = state.records.partition_point(|r| r.id <= after_id);

        Ok(state.records[start..]
            .iter()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_event(event_type: &str, amount: i64) -> NewEvent {
        NewEvent {
            event_type: event_type.to_string(),
            aggregate_id: None,
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({ "amount": amount }),
        }
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log").join("events.jsonl");

        {
            let store = FileEventStore::open(&path).unwrap();
            store.append(new_event("MoneyAdded", 1234)).unwrap();
            store.append(new_event("MoneySubtracted", 34)).unwrap();
        }

        let store = FileEventStore::open(&path).unwrap();
        let records: Vec<_> = store.list(EventFilter::all()).map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_type, "MoneyAdded");
        assert_eq!(records[1].payload["amount"], 34);
    }

    #[test]
    fn ids_continue_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        FileEventStore::open(&path)
            .unwrap()
            .append(new_event("A", 1))
            .unwrap();
        let next = FileEventStore::open(&path)
            .unwrap()
            .append(new_event("A", 2))
            .unwrap();

        assert_eq!(next.id, 2);
    }

    #[test]
    fn corrupt_line_is_reported_with_its_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();

        let err = FileEventStore::open(&path).unwrap_err();
        assert!(matches!(err, EventStoreError::Serialization(msg) if msg.contains("line 1")));
    }

    #[test]
    fn torn_write_is_rolled_back_and_the_id_reused_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = FileEventStore::open(&path).unwrap();
        store.append(new_event("MoneyAdded", 1)).unwrap();

        {
            let mut state = store.lock().unwrap();
            let len = state.file.metadata().unwrap().len();
            state.file.write_all(br#"{"id":2,"event_ty"#).unwrap();
            let cause = std::io::Error::other("disk full");
            let err = store.roll_back(&mut state, len, cause);
            assert!(matches!(err, EventStoreError::Persistence(msg) if msg.contains("disk full")));
            assert!(state.broken.is_none());
        }

        let next = store.append(new_event("MoneyAdded", 2)).unwrap();
        assert_eq!(next.id, 2);

        let reopened = FileEventStore::open(&path).unwrap();
        let amounts: Vec<_> = reopened
            .list(EventFilter::all())
            .map(|r| r.unwrap().payload["amount"].clone())
            .collect();
        assert_eq!(amounts, vec![json!(1), json!(2)]);
    }

    #[test]
    fn unrecoverable_write_failure_stops_further_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = FileEventStore::open(&path).unwrap();
        store.append(new_event("MoneyAdded", 1)).unwrap();

        // A read-only handle fails both the write and the truncation.
        store.lock().unwrap().file = File::open(&path).unwrap();

        let first = store.append(new_event("MoneyAdded", 2)).unwrap_err();
        assert!(matches!(first, EventStoreError::Persistence(msg) if msg.contains("rolled back")));
        assert!(matches!(
            store.append(new_event("MoneyAdded", 3)),
            Err(EventStoreError::Persistence(_))
        ));
        assert_eq!(store.get(1).unwrap().payload["amount"], 1);

        let reopened = FileEventStore::open(&path).unwrap();
        assert_eq!(reopened.append(new_event("MoneyAdded", 4)).unwrap().id, 2);
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEventStore::open(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(store.get(1), Err(EventStoreError::NotFound(1)));
    }
}
