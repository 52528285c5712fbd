use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed event read back from the log, with its position.
///
/// This is what replay iterates over: `id` is the log sequence number the
/// event was stored under, so envelopes sort exactly like the log does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    /// Monotonically increasing position in the log.
    id: u64,
    recorded_at: DateTime<Utc>,
    event: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(id: u64, recorded_at: DateTime<Utc>, event: E) -> Self {
        Self {
            id,
            recorded_at,
            event,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn into_event(self) -> E {
        self.event
    }
}
