use std::sync::RwLock;

use chrono::Utc;

use super::r#trait::{EventFilter, EventStore, EventStoreError, NewEvent, StoredEventRecord};

/// In-memory append-only event store.
///
/// Intended for tests/dev: "durable" here means "visible to every later read
/// in this process".
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    records: RwLock<Vec<StoredEventRecord>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> EventStoreError {
    EventStoreError::Persistence("lock poisoned".to_string())
}

impl EventStore for InMemoryEventStore {
    fn append(&self, event: NewEvent) -> Result<StoredEventRecord, EventStoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;

        // Ids are dense here: position + 1.
        let id = records.len() as u64 + 1;
        let stored = StoredEventRecord::from_new(id, Utc::now(), event);
        records.push(stored.clone());

        Ok(stored)
    }

    fn get(&self, id: u64) -> Result<StoredEventRecord, EventStoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        id.checked_sub(1)
            .and_then(|idx| records.get(idx as usize))
            .cloned()
            .ok_or(EventStoreError::NotFound(id))
    }

    fn read_page(
        &self,
        after_id: u64,
        limit: usize,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let start = records.partition_point(|r| r.id <= after_id);

        Ok(records[start..]
            .iter()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }
}
