use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use sourcerer_core::AggregateId;

/// Static description of a single event kind (one payload struct).
///
/// `STORABLE` is the "should be stored" capability: kinds that leave it at
/// `false` are dispatched to mutators and reactors but never reach the log.
/// Because it is an associated const, the decision is fixed at compile time
/// for every payload type.
pub trait EventKind {
    /// Stable tag written to the log and used for pipeline matching.
    const EVENT_TYPE: &'static str;

    /// Whether events of this kind are appended to the event store.
    const STORABLE: bool = false;
}

/// A domain event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **closed**: a domain models all its events as one enum, with
///   `event_type()` returning the tag of the active variant
/// - **serializable**: a stored event must decode back into an equal value
pub trait Event:
    Clone + PartialEq + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable event type identifier (e.g. "MoneyAdded").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// The aggregate this event is about, if any.
    fn aggregate_id(&self) -> Option<AggregateId>;

    /// Whether the active variant carries the storable capability.
    fn is_storable(&self) -> bool;
}
