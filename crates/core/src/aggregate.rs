//! Aggregate contract for event-projected domain state.

use crate::id::AggregateId;

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Returns the aggregate identifier.
    fn id(&self) -> AggregateId;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// This corresponds to the number of stored events that have been
    /// projected onto the aggregate, so a replayed aggregate and a live one
    /// agree on it.
    fn version(&self) -> u64;
}

/// State that is owned by the mutator pipeline.
///
/// Aggregates never mutate themselves from events directly: registered
/// mutators derive the next state from the current one. The aggregate only
/// knows how to come into existence and how to advance its version.
///
/// Implementations must be deterministic: the same history must always
/// produce the same value (`PartialEq` is used to check replay).
pub trait Aggregate:
    AggregateRoot + Clone + PartialEq + core::fmt::Debug + Send + Sync + 'static
{
    /// Stable aggregate type identifier (e.g. "account").
    const AGGREGATE_TYPE: &'static str;

    /// A fresh, not-yet-mutated instance used for first dispatch and replay.
    fn empty(id: AggregateId) -> Self;

    /// Record that one more stored event has been projected.
    fn advance_version(&mut self);
}
