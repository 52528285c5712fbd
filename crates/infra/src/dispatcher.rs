//! Event dispatch pipeline (the "sourcerer").
//!
//! Every raised event walks the same state machine:
//!
//! ```text
//! Received
//!   ↓
//! Classified ── storable? ──┬── Stored   (appended, durable)
//!                           └── Skipped
//!   ↓
//! Mutated    (all matching mutators, registration order)
//!   ↓
//! Reacted    (all matching reactors, post-mutation snapshot)
//!   ↓
//! Done       (intents handed to the sink by `raise`)
//! ```
//!
//! Storage completes before any mutator runs, and every mutator completes
//! before any reactor runs. Reactors therefore never see pre-mutation state,
//! and nothing is reacted to that the log does not contain.
//!
//! Each dispatch is synchronous and independent. Dispatches for the same
//! aggregate are serialized with [`AggregateLocks`]; different aggregates
//! proceed in parallel when the `Sourcerer` is shared across threads.
//! `rebuild_all` excludes every dispatch while it runs.

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use sourcerer_core::{Aggregate, AggregateId, AggregateRoot};
use sourcerer_events::{
    DiscardIntentSink, Event, IntentSink, Mutator, MutatorError, MutatorPipeline, ReactionIntent,
    Reactor, ReactorFailure, ReactorPipeline,
};

use crate::event_store::{EventStore, EventStoreError, NewEvent, StoredEventRecord};
use crate::locks::AggregateLocks;
use crate::replay::{ReplayError, ReplayReport, replay_aggregate, replay_all};
use crate::repository::{AggregateRepository, InMemoryAggregateRepository, RepositoryError};

/// Position of an event in the dispatch state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DispatchStage {
    Received,
    Classified,
    Stored,
    Skipped,
    Mutated,
    Reacted,
    Done,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The event could not be persisted; it is not considered delivered.
    #[error("event store error: {0}")]
    Store(#[from] EventStoreError),

    /// A mutator aborted the pipeline. Mutations before it were kept.
    #[error("mutator '{mutator}' failed on {event_type} for aggregate {aggregate_id}: {source}")]
    Mutator {
        aggregate_id: AggregateId,
        event_type: &'static str,
        mutator: String,
        /// The event was stored before the mutator ran.
        stored: Option<StoredEventRecord>,
        #[source]
        source: MutatorError,
    },

    #[error("aggregate repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome<A> {
    /// The appended record, if the event was storable.
    pub record: Option<StoredEventRecord>,
    /// Aggregate state after all mutators ran (`None` for events without a
    /// target aggregate).
    pub aggregate_after: Option<A>,
    /// Intents collected from reactors, in reactor registration order.
    pub intents: Vec<ReactionIntent>,
    /// Reactors that failed; they did not stop the others.
    pub failed_reactors: Vec<ReactorFailure>,
}

impl<A> DispatchOutcome<A> {
    pub fn stored(&self) -> bool {
        self.record.is_some()
    }
}

/// Startup-time configuration for a [`Sourcerer`].
///
/// Registrations are additive and ordered: adding a second mutator for an
/// event type runs it after the first, never instead of it.
pub struct SourcererBuilder<S, A, E> {
    store: S,
    repository: Option<Arc<dyn AggregateRepository<A>>>,
    sink: Option<Arc<dyn IntentSink>>,
    mutators: MutatorPipeline<A, E>,
    reactors: ReactorPipeline<A, E>,
}

impl<S, A, E> SourcererBuilder<S, A, E>
where
    S: EventStore,
    A: Aggregate,
    E: Event,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            repository: None,
            sink: None,
            mutators: MutatorPipeline::new(),
            reactors: ReactorPipeline::new(),
        }
    }

    pub fn repository(mut self, repository: Arc<dyn AggregateRepository<A>>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn IntentSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register a mutator for the event types it declares.
    pub fn add_mutator(mut self, mutator: impl Mutator<A, E> + 'static) -> Self {
        self.mutators.add(mutator);
        self
    }

    /// Register a mutator for explicit event types.
    pub fn register_mutator<I, T>(mut self, mutator: impl Mutator<A, E> + 'static, event_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.mutators.register(mutator, event_types);
        self
    }

    /// Register a reactor for the event types it declares.
    pub fn add_reactor(mut self, reactor: impl Reactor<A, E> + 'static) -> Self {
        self.reactors.add(reactor);
        self
    }

    /// Register a reactor for explicit event types.
    pub fn register_reactor<I, T>(mut self, reactor: impl Reactor<A, E> + 'static, event_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.reactors.register(reactor, event_types);
        self
    }

    pub fn build(self) -> Sourcerer<S, A, E> {
        Sourcerer {
            store: self.store,
            repository: self
                .repository
                .unwrap_or_else(|| Arc::new(InMemoryAggregateRepository::<A>::new())),
            sink: self.sink.unwrap_or_else(|| Arc::new(DiscardIntentSink)),
            mutators: self.mutators,
            reactors: self.reactors,
            locks: AggregateLocks::new(),
            gate: RwLock::new(()),
        }
    }
}

/// Stores, projects and reacts to domain events.
pub struct Sourcerer<S, A, E> {
    store: S,
    repository: Arc<dyn AggregateRepository<A>>,
    sink: Arc<dyn IntentSink>,
    mutators: MutatorPipeline<A, E>,
    reactors: ReactorPipeline<A, E>,
    locks: AggregateLocks,
    /// Shared by dispatches and single rebuilds, exclusive for `rebuild_all`.
    gate: RwLock<()>,
}

impl<S, A, E> core::fmt::Debug for Sourcerer<S, A, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sourcerer")
            .field("mutators", &self.mutators)
            .field("reactors", &self.reactors)
            .finish_non_exhaustive()
    }
}

impl<S, A, E> Sourcerer<S, A, E>
where
    S: EventStore,
    A: Aggregate,
    E: Event,
{
    pub fn builder(store: S) -> SourcererBuilder<S, A, E> {
        SourcererBuilder::new(store)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn mutators(&self) -> &MutatorPipeline<A, E> {
        &self.mutators
    }

    pub fn reactors(&self) -> &ReactorPipeline<A, E> {
        &self.reactors
    }

    /// Whether `event` will be appended to the log when dispatched.
    pub fn is_storable(&self, event: &E) -> bool {
        event.is_storable()
    }

    /// Current projected state of an aggregate, if it was ever dispatched to.
    pub fn aggregate(&self, id: AggregateId) -> Result<Option<A>, DispatchError> {
        Ok(self.repository.load(id)?)
    }

    /// Every projected aggregate, ordered by id.
    pub fn aggregates(&self) -> Result<Vec<A>, DispatchError> {
        Ok(self.repository.list()?)
    }

    /// Entry point for callers: dispatch `event`, then hand the resulting
    /// intents to the sink.
    ///
    /// Sink failures are logged and do not fail the call; the intents are
    /// still returned in the outcome.
    pub fn raise(&self, event: E) -> Result<DispatchOutcome<A>, DispatchError> {
        let event_type = event.event_type();
        let outcome = self.dispatch(event)?;

        for intent in &outcome.intents {
            if let Err(error) = self.sink.deliver(intent.clone()) {
                tracing::warn!(
                    kind = intent.kind(),
                    name = intent.name(),
                    error = %error,
                    "intent sink rejected reaction intent"
                );
            }
        }

        trace_stage(&DispatchStage::Done, event_type);
        Ok(outcome)
    }

    /// Classify, store, mutate and react, strictly in that order.
    pub fn dispatch(&self, event: E) -> Result<DispatchOutcome<A>, DispatchError> {
        let event_type = event.event_type();
        trace_stage(&DispatchStage::Received, event_type);

        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        match event.aggregate_id() {
            Some(id) => self
                .locks
                .with_lock(id, || self.dispatch_locked(&event, event_type, Some(id))),
            None => self.dispatch_locked(&event, event_type, None),
        }
    }

    fn dispatch_locked(
        &self,
        event: &E,
        event_type: &'static str,
        target: Option<AggregateId>,
    ) -> Result<DispatchOutcome<A>, DispatchError> {
        let storable = self.is_storable(event);
        trace_stage(&DispatchStage::Classified, event_type);

        let record = if storable {
            let stored = self.store.append(NewEvent::from_typed(event)?)?;
            tracing::info!(id = stored.id, event_type, "event stored");
            trace_stage(&DispatchStage::Stored, event_type);
            Some(stored)
        } else {
            trace_stage(&DispatchStage::Skipped, event_type);
            None
        };

        let Some(id) = target else {
            return Ok(DispatchOutcome {
                record,
                aggregate_after: None,
                intents: vec![],
                failed_reactors: vec![],
            });
        };

        let current = self.repository.load(id)?.unwrap_or_else(|| A::empty(id));
        let mut next = match self.mutators.apply(current, event) {
            Ok(next) => next,
            Err(aborted) => {
                tracing::error!(
                    aggregate_id = %id,
                    event_type,
                    mutator = %aborted.mutator,
                    error = %aborted.error,
                    "mutator failed; keeping state of earlier mutators"
                );
                let mut partial = aborted.aggregate;
                if record.is_some() {
                    partial.advance_version();
                }
                self.repository.save(partial)?;
                return Err(DispatchError::Mutator {
                    aggregate_id: id,
                    event_type,
                    mutator: aborted.mutator,
                    stored: record,
                    source: aborted.error,
                });
            }
        };
        if record.is_some() {
            next.advance_version();
        }
        self.repository.save(next.clone())?;
        trace_stage(&DispatchStage::Mutated, event_type);

        let reactions = self.reactors.react(event, &next);
        trace_stage(&DispatchStage::Reacted, event_type);

        tracing::debug!(
            aggregate_id = %next.id(),
            version = next.version(),
            intents = reactions.intents.len(),
            "event dispatched"
        );

        Ok(DispatchOutcome {
            record,
            aggregate_after: Some(next),
            intents: reactions.intents,
            failed_reactors: reactions.failures,
        })
    }

    /// Rebuild an aggregate from its stored history without touching the
    /// repository.
    pub fn replay(&self, id: AggregateId) -> Result<A, ReplayError> {
        replay_aggregate(&self.store, &self.mutators, id).map(|(aggregate, _)| aggregate)
    }

    /// Replay an aggregate and overwrite its projected state with the result.
    pub fn rebuild(&self, id: AggregateId) -> Result<(A, ReplayReport), DispatchError> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.locks.with_lock(id, || {
            let (aggregate, report) = replay_aggregate(&self.store, &self.mutators, id)?;
            self.repository.save(aggregate.clone())?;
            Ok((aggregate, report))
        })
    }

    /// Discard every projection and rebuild all aggregates from the log.
    ///
    /// Waits for in-flight dispatches to finish and holds off new ones until
    /// every aggregate has been saved.
    pub fn rebuild_all(&self) -> Result<ReplayReport, DispatchError> {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        let (aggregates, report) = replay_all(&self.store, &self.mutators)?;

        self.repository.clear()?;
        for aggregate in aggregates.into_values() {
            self.repository.save(aggregate)?;
        }
        Ok(report)
    }
}

fn trace_stage(stage: &DispatchStage, event_type: &str) {
    tracing::debug!(?stage, event_type, "dispatch stage");
}

impl From<ReplayError> for DispatchError {
    fn from(value: ReplayError) -> Self {
        match value {
            ReplayError::EventStore(e) => DispatchError::Store(e),
        }
    }
}
