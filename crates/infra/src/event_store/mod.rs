//! Append-only event store boundary.
//!
//! The log is global and ordered by a store-assigned id. Three backends share
//! the [`EventStore`] contract:
//!
//! - [`InMemoryEventStore`] for tests and development
//! - [`FileEventStore`], a JSON-lines file synced on every append
//! - [`PostgresEventStore`], a `stored_events` table

pub mod file;
pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use file::FileEventStore;
pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{
    DEFAULT_PAGE_SIZE, EventFilter, EventStore, EventStoreError, NewEvent, RecordStream,
    StoredEventRecord,
};
