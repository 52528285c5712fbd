//! Postgres-backed event store implementation.
//!
//! Records live in a single `stored_events` table; the id comes from a
//! `BIGSERIAL`, which gives strictly increasing, never-reused ids under
//! concurrent writers (gaps are possible after rolled-back inserts). The
//! table is provisioned by the host:
//!
//! ```sql
//! CREATE TABLE stored_events (
//!     id            BIGSERIAL PRIMARY KEY,
//!     event_type    TEXT        NOT NULL,
//!     aggregate_id  UUID        NULL,
//!     event_version INT         NOT NULL,
//!     occurred_at   TIMESTAMPTZ NOT NULL,
//!     recorded_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     payload       JSONB       NOT NULL
//! );
//! CREATE INDEX stored_events_aggregate ON stored_events (aggregate_id, id);
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | EventStoreError |
//! |------------|-----------------|
//! | RowNotFound (on `get`) | `NotFound` |
//! | Database / PoolClosed / Io / anything else | `Persistence` |
//! | Decode / ColumnDecode | `Serialization` |
//!
//! ## Thread Safety
//!
//! `PostgresEventStore` is `Send + Sync`; the SQLx pool handles connection
//! sharing.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use std::sync::Arc;
use tokio::runtime::RuntimeFlavor;
use tracing::{Span, instrument};
use uuid::Uuid;

use sourcerer_core::AggregateId;

use super::r#trait::{EventFilter, EventStore, EventStoreError, NewEvent, StoredEventRecord};

/// Postgres-backed append-only event store.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, EventStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Insert one record. The insert is committed (and therefore durable)
    /// before this returns.
    #[instrument(
        skip(self, event),
        fields(event_type = %event.event_type, id = tracing::field::Empty),
        err
    )]
    pub async fn insert(&self, event: NewEvent) -> Result<StoredEventRecord, EventStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO stored_events (
                event_type,
                aggregate_id,
                event_version,
                occurred_at,
                payload
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, recorded_at
            "#,
        )
        .bind(&event.event_type)
        .bind(event.aggregate_id.map(Uuid::from))
        .bind(event.event_version as i32)
        .bind(event.occurred_at)
        .bind(&event.payload)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("insert", e))?;
        let recorded_at: DateTime<Utc> = row
            .try_get("recorded_at")
            .map_err(|e| map_sqlx_error("insert", e))?;

        Span::current().record("id", id);
        Ok(StoredEventRecord::from_new(id as u64, recorded_at, event))
    }

    #[instrument(skip(self), err)]
    pub async fn fetch(&self, id: u64) -> Result<StoredEventRecord, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, event_version, occurred_at, recorded_at, payload
            FROM stored_events
            WHERE id = $1
            "#,
        )
        .bind(id as i64)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch", e))?
        .ok_or(EventStoreError::NotFound(id))?;

        let stored = StoredEventRow::from_row(&row).map_err(|e| map_sqlx_error("fetch", e))?;
        Ok(stored.into())
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_page(
        &self,
        after_id: u64,
        limit: usize,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, event_version, occurred_at, recorded_at, payload
            FROM stored_events
            WHERE id > $1
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::uuid IS NULL OR aggregate_id = $3)
            ORDER BY id ASC
            LIMIT $4
            "#,
        )
        .bind(after_id as i64)
        .bind(filter.event_type.as_deref())
        .bind(filter.aggregate_id.map(Uuid::from))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_page", e))?;

        rows.iter()
            .map(|row| {
                StoredEventRow::from_row(row)
                    .map(StoredEventRecord::from)
                    .map_err(|e| map_sqlx_error("fetch_page", e))
            })
            .collect()
    }
}

/// Run an async store operation from the synchronous `EventStore` trait.
///
/// Requires a multi-threaded tokio runtime: the current worker is handed off
/// while the query runs. Any other context is reported as `Persistence`.
fn block_on<F, T>(operation: &str, fut: F) -> Result<T, EventStoreError>
where
    F: std::future::Future<Output = Result<T, EventStoreError>>,
{
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        EventStoreError::Persistence(format!(
            "PostgresEventStore::{operation} requires a tokio runtime"
        ))
    })?;

    if matches!(handle.runtime_flavor(), RuntimeFlavor::CurrentThread) {
        return Err(EventStoreError::Persistence(format!(
            "PostgresEventStore::{operation} requires a multi-threaded tokio runtime"
        )));
    }

    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl EventStore for PostgresEventStore {
    fn append(&self, event: NewEvent) -> Result<StoredEventRecord, EventStoreError> {
        block_on("append", self.insert(event))
    }

    fn get(&self, id: u64) -> Result<StoredEventRecord, EventStoreError> {
        block_on("get", self.fetch(id))
    }

    fn read_page(
        &self,
        after_id: u64,
        limit: usize,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        block_on("read_page", self.fetch_page(after_id, limit, filter))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => EventStoreError::Persistence(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            EventStoreError::Persistence(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::Decode(e) => {
            EventStoreError::Serialization(format!("decode error in {operation}: {e}"))
        }
        sqlx::Error::ColumnDecode { index, source } => EventStoreError::Serialization(format!(
            "column {index} decode error in {operation}: {source}"
        )),
        _ => EventStoreError::Persistence(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct StoredEventRow {
    id: i64,
    event_type: String,
    aggregate_id: Option<Uuid>,
    event_version: i32,
    occurred_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_version: row.try_get("event_version")?,
            occurred_at: row.try_get("occurred_at")?,
            recorded_at: row.try_get("recorded_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<StoredEventRow> for StoredEventRecord {
    fn from(row: StoredEventRow) -> Self {
        StoredEventRecord {
            id: row.id as u64,
            event_type: row.event_type,
            aggregate_id: row.aggregate_id.map(AggregateId::from_uuid),
            event_version: row.event_version as u32,
            occurred_at: row.occurred_at,
            recorded_at: row.recorded_at,
            payload: row.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_store() -> PostgresEventStore {
        // Never connects: every call below is rejected before a query runs.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/sourcerer")
            .unwrap();
        PostgresEventStore::new(pool)
    }

    fn is_runtime_error<T>(result: Result<T, EventStoreError>) -> bool {
        matches!(result, Err(EventStoreError::Persistence(msg)) if msg.contains("runtime"))
    }

    #[tokio::test]
    async fn current_thread_runtime_is_rejected() {
        let store = lazy_store();
        let event = NewEvent {
            event_type: "MoneyAdded".to_string(),
            aggregate_id: None,
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({ "amount": 5 }),
        };

        assert!(is_runtime_error(store.append(event)));
        assert!(is_runtime_error(store.get(1)));
        assert!(is_runtime_error(
            store.read_page(0, 10, &EventFilter::all())
        ));
    }

    #[test]
    fn no_runtime_is_rejected() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = runtime.block_on(async { lazy_store() });

        assert!(is_runtime_error(store.get(1)));
    }
}
