//! Mutator pipeline (state projection).
//!
//! A mutator derives the next aggregate state from the current state and one
//! event. Mutators are registered against one or more event types; for a given
//! event the pipeline runs every matching mutator **in registration order**,
//! threading the aggregate through each of them.
//!
//! Mutators must be pure and deterministic. Replay depends on it: rebuilding
//! an aggregate from the stored history has to land on exactly the state the
//! live pipeline produced.

use std::sync::Arc;

use thiserror::Error;

use sourcerer_core::DomainError;

use crate::Event;

/// Failure raised by a single mutator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MutatorError {
    /// The event would break an aggregate invariant.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Any other reason the mutator could not project the event.
    #[error("{0}")]
    Failed(String),
}

impl MutatorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// A pure projection `(aggregate, event) -> aggregate'`.
pub trait Mutator<A, E>: Send + Sync {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    /// Event types this mutator declares interest in (used by
    /// [`MutatorPipeline::add`]).
    fn event_types(&self) -> &[&'static str] {
        &[]
    }

    fn mutate(&self, aggregate: &A, event: &E) -> Result<A, MutatorError>;
}

impl<A, E, M> Mutator<A, E> for Arc<M>
where
    M: Mutator<A, E> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn event_types(&self) -> &[&'static str] {
        (**self).event_types()
    }

    fn mutate(&self, aggregate: &A, event: &E) -> Result<A, MutatorError> {
        (**self).mutate(aggregate, event)
    }
}

/// Mutator backed by a closure. Build one with [`mutator_fn`].
pub struct FnMutator<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a named mutator (register it with
/// [`MutatorPipeline::register`]).
pub fn mutator_fn<A, E, F>(name: impl Into<String>, f: F) -> FnMutator<F>
where
    F: Fn(&A, &E) -> Result<A, MutatorError> + Send + Sync,
{
    FnMutator {
        name: name.into(),
        f,
    }
}

impl<A, E, F> Mutator<A, E> for FnMutator<F>
where
    F: Fn(&A, &E) -> Result<A, MutatorError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn mutate(&self, aggregate: &A, event: &E) -> Result<A, MutatorError> {
        (self.f)(aggregate, event)
    }
}

/// The pipeline stopped at a failing mutator.
///
/// `aggregate` is the state after the last mutator that succeeded. Earlier
/// mutations are **not** rolled back; callers decide whether to keep it.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationAborted<A> {
    pub aggregate: A,
    pub mutator: String,
    pub error: MutatorError,
}

struct Registration<A, E> {
    event_types: Vec<String>,
    mutator: Arc<dyn Mutator<A, E>>,
}

impl<A, E> Registration<A, E> {
    fn matches(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type)
    }
}

/// Ordered set of mutator registrations.
///
/// Registrations are additive: registering a second mutator for an event type
/// never replaces the first one.
pub struct MutatorPipeline<A, E> {
    registrations: Vec<Registration<A, E>>,
}

impl<A, E> Default for MutatorPipeline<A, E> {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }
}

impl<A, E> core::fmt::Debug for MutatorPipeline<A, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(
                self.registrations
                    .iter()
                    .map(|r| (r.mutator.name(), &r.event_types)),
            )
            .finish()
    }
}

impl<A, E> MutatorPipeline<A, E>
where
    E: Event,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `mutator` for the given event types.
    pub fn register<M, I, T>(&mut self, mutator: M, event_types: I) -> &mut Self
    where
        M: Mutator<A, E> + 'static,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.registrations.push(Registration {
            event_types: event_types.into_iter().map(Into::into).collect(),
            mutator: Arc::new(mutator),
        });
        self
    }

    /// Register `mutator` for the event types it declares itself.
    pub fn add<M>(&mut self, mutator: M) -> &mut Self
    where
        M: Mutator<A, E> + 'static,
    {
        let types: Vec<String> = mutator.event_types().iter().map(|t| t.to_string()).collect();
        self.register(mutator, types)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Whether any mutator is registered for `event_type`.
    pub fn handles(&self, event_type: &str) -> bool {
        self.registrations.iter().any(|r| r.matches(event_type))
    }

    /// Run every matching mutator in registration order.
    ///
    /// Returns the aggregate unchanged when nothing matches.
    pub fn apply(&self, aggregate: A, event: &E) -> Result<A, MutationAborted<A>> {
        let event_type = event.event_type();
        let mut current = aggregate;

        for reg in self.registrations.iter().filter(|r| r.matches(event_type)) {
            match reg.mutator.mutate(&current, event) {
                Ok(next) => current = next,
                Err(error) => {
                    return Err(MutationAborted {
                        aggregate: current,
                        mutator: reg.mutator.name().to_string(),
                        error,
                    });
                }
            }
        }

        Ok(current)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use sourcerer_core::AggregateId;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) enum TallyEvent {
        Bumped(i64),
        Reset,
    }

    impl Event for TallyEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TallyEvent::Bumped(_) => "Bumped",
                TallyEvent::Reset => "Reset",
            }
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            DateTime::<Utc>::UNIX_EPOCH
        }

        fn aggregate_id(&self) -> Option<AggregateId> {
            None
        }

        fn is_storable(&self) -> bool {
            true
        }
    }

    /// Records the order mutators ran in.
    pub(crate) type Trail = Vec<&'static str>;

    fn tagging(tag: &'static str) -> FnMutator<impl Fn(&Trail, &TallyEvent) -> Result<Trail, MutatorError>> {
        mutator_fn(tag, move |trail: &Trail, _: &TallyEvent| {
            let mut next = trail.clone();
            next.push(tag);
            Ok(next)
        })
    }

    #[test]
    fn runs_matching_mutators_in_registration_order() {
        let mut pipeline = MutatorPipeline::new();
        pipeline
            .register(tagging("m1"), ["Bumped"])
            .register(tagging("m2"), ["Bumped", "Reset"])
            .register(tagging("m3"), ["Bumped"]);

        let trail = pipeline.apply(Vec::new(), &TallyEvent::Bumped(1)).unwrap();
        assert_eq!(trail, vec!["m1", "m2", "m3"]);

        let trail = pipeline.apply(Vec::new(), &TallyEvent::Reset).unwrap();
        assert_eq!(trail, vec!["m2"]);
    }

    #[test]
    fn unmatched_event_leaves_aggregate_untouched() {
        let mut pipeline = MutatorPipeline::new();
        pipeline.register(tagging("m1"), ["Bumped"]);

        let trail = pipeline.apply(vec!["seed"], &TallyEvent::Reset).unwrap();
        assert_eq!(trail, vec!["seed"]);
        assert!(pipeline.handles("Bumped"));
        assert!(!pipeline.handles("Reset"));
    }

    #[test]
    fn failure_keeps_state_of_last_successful_mutator() {
        let mut pipeline = MutatorPipeline::new();
        pipeline
            .register(tagging("m1"), ["Bumped"])
            .register(
                mutator_fn("explodes", |_: &Trail, _: &TallyEvent| {
                    Err(MutatorError::failed("boom"))
                }),
                ["Bumped"],
            )
            .register(tagging("never"), ["Bumped"]);

        let aborted = pipeline.apply(Vec::new(), &TallyEvent::Bumped(1)).unwrap_err();
        assert_eq!(aborted.aggregate, vec!["m1"]);
        assert_eq!(aborted.mutator, "explodes");
        assert_eq!(aborted.error, MutatorError::failed("boom"));
    }

    #[test]
    fn add_uses_declared_event_types() {
        struct ResetOnly;

        impl Mutator<i64, TallyEvent> for ResetOnly {
            fn event_types(&self) -> &[&'static str] {
                &["Reset"]
            }

            fn mutate(&self, _: &i64, _: &TallyEvent) -> Result<i64, MutatorError> {
                Ok(0)
            }
        }

        let mut pipeline = MutatorPipeline::new();
        pipeline.add(ResetOnly);

        assert_eq!(pipeline.apply(7, &TallyEvent::Reset).unwrap(), 0);
        assert_eq!(pipeline.apply(7, &TallyEvent::Bumped(3)).unwrap(), 7);
    }

    fn summing() -> MutatorPipeline<i64, TallyEvent> {
        let mut pipeline = MutatorPipeline::new();
        pipeline
            .register(
                mutator_fn("sum", |total: &i64, ev: &TallyEvent| match ev {
                    TallyEvent::Bumped(n) => Ok(total + n),
                    TallyEvent::Reset => Ok(*total),
                }),
                ["Bumped"],
            )
            .register(mutator_fn("reset", |_: &i64, _: &TallyEvent| Ok(0)), ["Reset"]);
        pipeline
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: folding the same history twice yields the same state.
        #[test]
        fn projection_is_deterministic(
            steps in prop::collection::vec(prop::option::of(-1_000i64..1_000i64), 0..40)
        ) {
            let history: Vec<TallyEvent> = steps
                .into_iter()
                .map(|s| s.map(TallyEvent::Bumped).unwrap_or(TallyEvent::Reset))
                .collect();

            let pipeline = summing();
            let fold = |pipeline: &MutatorPipeline<i64, TallyEvent>| {
                history.iter().fold(0i64, |acc, ev| pipeline.apply(acc, ev).unwrap())
            };

            prop_assert_eq!(fold(&pipeline), fold(&pipeline));
        }
    }
}
