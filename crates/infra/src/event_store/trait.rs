use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use sourcerer_core::AggregateId;
use sourcerer_events::{Event, EventEnvelope};

/// An event ready to be appended (not yet assigned an id).
///
/// Built from a typed event with [`NewEvent::from_typed`], which serializes the
/// payload and captures the metadata needed to decode it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub aggregate_id: Option<AggregateId>,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl NewEvent {
    pub fn from_typed<E>(event: &E) -> Result<Self, EventStoreError>
    where
        E: Event,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::Serialization(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_type: event.event_type().to_string(),
            aggregate_id: event.aggregate_id(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// A persisted event in the append-only log.
///
/// `id` is assigned by the store, strictly increasing across the whole log and
/// never reused. Records are never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEventRecord {
    pub id: u64,
    pub event_type: String,
    pub aggregate_id: Option<AggregateId>,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl StoredEventRecord {
    pub(crate) fn from_new(id: u64, recorded_at: DateTime<Utc>, event: NewEvent) -> Self {
        Self {
            id,
            event_type: event.event_type,
            aggregate_id: event.aggregate_id,
            event_version: event.event_version,
            occurred_at: event.occurred_at,
            recorded_at,
            payload: event.payload,
        }
    }

    /// Deserialize the payload back into the typed event.
    pub fn decode<E>(&self) -> Result<EventEnvelope<E>, EventStoreError>
    where
        E: Event,
    {
        let event: E = serde_json::from_value(self.payload.clone()).map_err(|e| {
            EventStoreError::Serialization(format!(
                "record {} ({}) does not decode: {e}",
                self.id, self.event_type
            ))
        })?;

        if event.event_type() != self.event_type {
            return Err(EventStoreError::Serialization(format!(
                "record {} is tagged '{}' but decodes as '{}'",
                self.id,
                self.event_type,
                event.event_type()
            )));
        }

        Ok(EventEnvelope::new(self.id, self.recorded_at, event))
    }
}

/// Event store operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// The backing log is unreachable or the write did not become durable.
    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("stored event {0} not found")]
    NotFound(u64),

    /// A payload could not be encoded, or a stored payload could not be decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Filter criteria for listing records. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Filter by event type (e.g. "MoneyAdded").
    pub event_type: Option<String>,
    /// Filter by target aggregate.
    pub aggregate_id: Option<AggregateId>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_type(event_type: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            ..Self::default()
        }
    }

    pub fn aggregate(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &StoredEventRecord) -> bool {
        self.event_type
            .as_deref()
            .is_none_or(|t| t == record.event_type)
            && self
                .aggregate_id
                .is_none_or(|id| record.aggregate_id == Some(id))
    }
}

/// Append-only, globally ordered event log.
///
/// Implementations must:
/// - make `append` durable before returning
/// - assign strictly increasing ids (gaps allowed, reuse never)
/// - tolerate concurrent writers
/// - return records from `read_page` in ascending id order
pub trait EventStore: Send + Sync {
    fn append(&self, event: NewEvent) -> Result<StoredEventRecord, EventStoreError>;

    fn get(&self, id: u64) -> Result<StoredEventRecord, EventStoreError>;

    /// Up to `limit` matching records with `id > after_id`, ascending.
    fn read_page(
        &self,
        after_id: u64,
        limit: usize,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEventRecord>, EventStoreError>;

    /// Lazily iterate every matching record in id order.
    fn list(&self, filter: EventFilter) -> RecordStream<'_, Self>
    where
        Self: Sized,
    {
        RecordStream::new(self, filter)
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(&self, event: NewEvent) -> Result<StoredEventRecord, EventStoreError> {
        (**self).append(event)
    }

    fn get(&self, id: u64) -> Result<StoredEventRecord, EventStoreError> {
        (**self).get(id)
    }

    fn read_page(
        &self,
        after_id: u64,
        limit: usize,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        (**self).read_page(after_id, limit, filter)
    }
}

impl<S> EventStore for Box<S>
where
    S: EventStore + ?Sized,
{
    fn append(&self, event: NewEvent) -> Result<StoredEventRecord, EventStoreError> {
        (**self).append(event)
    }

    fn get(&self, id: u64) -> Result<StoredEventRecord, EventStoreError> {
        (**self).get(id)
    }

    fn read_page(
        &self,
        after_id: u64,
        limit: usize,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        (**self).read_page(after_id, limit, filter)
    }
}

/// Records fetched per `read_page` call while streaming.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Lazy, finite, restartable sequence of stored records.
///
/// Pages through [`EventStore::read_page`] with an id cursor; nothing is read
/// until the first `next()`. The stream ends at the first short page. An
/// error is yielded once and ends the stream; [`restart`](Self::restart)
/// rewinds to the stream's starting point.
pub struct RecordStream<'a, S: ?Sized> {
    store: &'a S,
    filter: EventFilter,
    page_size: usize,
    start: u64,
    cursor: u64,
    buffer: VecDeque<StoredEventRecord>,
    exhausted: bool,
}

impl<'a, S> RecordStream<'a, S>
where
    S: EventStore + ?Sized,
{
    pub fn new(store: &'a S, filter: EventFilter) -> Self {
        Self {
            store,
            filter,
            page_size: DEFAULT_PAGE_SIZE,
            start: 0,
            cursor: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Start after `id` instead of at the beginning of the log.
    pub fn after(mut self, id: u64) -> Self {
        self.start = id;
        self.cursor = id;
        self
    }

    /// Rewind to where the stream started (the head of the log, or the id
    /// given to [`after`](Self::after)).
    pub fn restart(&mut self) {
        self.cursor = self.start;
        self.buffer.clear();
        self.exhausted = false;
    }
}

impl<S> Iterator for RecordStream<'_, S>
where
    S: EventStore + ?Sized,
{
    type Item = Result<StoredEventRecord, EventStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.buffer.pop_front() {
            return Some(Ok(record));
        }
        if self.exhausted {
            return None;
        }

        match self.store.read_page(self.cursor, self.page_size, &self.filter) {
            Ok(page) => {
                if page.len() < self.page_size {
                    self.exhausted = true;
                }
                if let Some(last) = page.last() {
                    self.cursor = last.id;
                }
                self.buffer.extend(page);
                self.buffer.pop_front().map(Ok)
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}
