//! Rebuilding aggregates from the stored history.
//!
//! Replay feeds stored records, in id order, through the same mutator pipeline
//! the live dispatcher uses, starting from `Aggregate::empty`. Mutator failures
//! are handled the way the dispatcher handles them (keep the partial state,
//! count the event), so replay lands on the live state.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use sourcerer_core::{Aggregate, AggregateId};
use sourcerer_events::{Event, MutatorPipeline};

use crate::event_store::{EventFilter, EventStore, EventStoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),
}

/// Summary of one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Stored records projected.
    pub events_applied: u64,
    /// Records whose mutator pipeline aborted part-way.
    pub aborted_mutations: u64,
    /// Id of the last record read.
    pub last_id: Option<u64>,
}

fn project<A, E>(
    mutators: &MutatorPipeline<A, E>,
    aggregate: A,
    event: &E,
    record_id: u64,
    report: &mut ReplayReport,
) -> A
where
    A: Aggregate,
    E: Event,
{
    let mut next = match mutators.apply(aggregate, event) {
        Ok(next) => next,
        Err(aborted) => {
            tracing::warn!(
                record_id,
                mutator = %aborted.mutator,
                error = %aborted.error,
                "mutator aborted during replay; keeping partial state"
            );
            report.aborted_mutations += 1;
            aborted.aggregate
        }
    };
    next.advance_version();
    report.events_applied += 1;
    report.last_id = Some(record_id);
    next
}

/// Rebuild one aggregate from its full stored history.
pub fn replay_aggregate<S, A, E>(
    store: &S,
    mutators: &MutatorPipeline<A, E>,
    id: AggregateId,
) -> Result<(A, ReplayReport), ReplayError>
where
    S: EventStore,
    A: Aggregate,
    E: Event,
{
    let mut report = ReplayReport::default();
    let mut aggregate = A::empty(id);

    for record in store.list(EventFilter::aggregate(id)) {
        let record = record?;
        let envelope = record.decode::<E>()?;
        aggregate = project(mutators, aggregate, envelope.event(), record.id, &mut report);
    }

    tracing::debug!(
        aggregate_id = %id,
        events = report.events_applied,
        "aggregate replayed"
    );
    Ok((aggregate, report))
}

/// Rebuild every aggregate referenced by the log in a single pass.
pub fn replay_all<S, A, E>(
    store: &S,
    mutators: &MutatorPipeline<A, E>,
) -> Result<(BTreeMap<AggregateId, A>, ReplayReport), ReplayError>
where
    S: EventStore,
    A: Aggregate,
    E: Event,
{
    let mut report = ReplayReport::default();
    let mut aggregates: BTreeMap<AggregateId, A> = BTreeMap::new();

    for record in store.list(EventFilter::all()) {
        let record = record?;
        let Some(id) = record.aggregate_id else {
            continue;
        };
        let envelope = record.decode::<E>()?;

        let current = aggregates.remove(&id).unwrap_or_else(|| A::empty(id));
        let next = project(mutators, current, envelope.event(), record.id, &mut report);
        aggregates.insert(id, next);
    }

    tracing::info!(
        aggregates = aggregates.len(),
        events = report.events_applied,
        "log replayed"
    );
    Ok((aggregates, report))
}
