//! Reactor pipeline (post-mutation side effects).
//!
//! Reactors run after every mutator for an event has finished, so they always
//! see the aggregate's post-mutation state. They get it by shared reference and
//! answer with [`ReactionIntent`]s; the pipeline collects intents and never
//! executes them.
//!
//! Reactors are best-effort and isolated: a failing reactor is logged and
//! skipped, and the remaining reactors still run.

use std::sync::Arc;

use thiserror::Error;

use crate::{Event, ReactionIntent};

/// Failure raised by a single reactor. Never propagated past the pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ReactorError(pub String);

impl ReactorError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A handler `(event, aggregate snapshot) -> intents`.
pub trait Reactor<A, E>: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    /// Event types this reactor declares interest in (used by
    /// [`ReactorPipeline::add`]).
    fn event_types(&self) -> &[&'static str] {
        &[]
    }

    fn react(&self, event: &E, aggregate: &A) -> Result<Vec<ReactionIntent>, ReactorError>;
}

impl<A, E, R> Reactor<A, E> for Arc<R>
where
    R: Reactor<A, E> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn event_types(&self) -> &[&'static str] {
        (**self).event_types()
    }

    fn react(&self, event: &E, aggregate: &A) -> Result<Vec<ReactionIntent>, ReactorError> {
        (**self).react(event, aggregate)
    }
}

/// Reactor backed by a closure. Build one with [`reactor_fn`].
pub struct FnReactor<F> {
    name: String,
    f: F,
}

pub fn reactor_fn<A, E, F>(name: impl Into<String>, f: F) -> FnReactor<F>
where
    F: Fn(&E, &A) -> Result<Vec<ReactionIntent>, ReactorError> + Send + Sync,
{
    FnReactor {
        name: name.into(),
        f,
    }
}

impl<A, E, F> Reactor<A, E> for FnReactor<F>
where
    F: Fn(&E, &A) -> Result<Vec<ReactionIntent>, ReactorError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn react(&self, event: &E, aggregate: &A) -> Result<Vec<ReactionIntent>, ReactorError> {
        (self.f)(event, aggregate)
    }
}

/// A reactor that failed during one `react` pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorFailure {
    pub reactor: String,
    pub error: ReactorError,
}

/// Everything the reactors produced for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reactions {
    pub intents: Vec<ReactionIntent>,
    pub failures: Vec<ReactorFailure>,
}

struct Registration<A, E> {
    event_types: Vec<String>,
    reactor: Arc<dyn Reactor<A, E>>,
}

/// Ordered set of reactor registrations (additive, never replaced).
pub struct ReactorPipeline<A, E> {
    registrations: Vec<Registration<A, E>>,
}

impl<A, E> Default for ReactorPipeline<A, E> {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }
}

impl<A, E> core::fmt::Debug for ReactorPipeline<A, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(
                self.registrations
                    .iter()
                    .map(|r| (r.reactor.name(), &r.event_types)),
            )
            .finish()
    }
}

impl<A, E> ReactorPipeline<A, E>
where
    E: Event,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<R, I, T>(&mut self, reactor: R, event_types: I) -> &mut Self
    where
        R: Reactor<A, E> + 'static,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.registrations.push(Registration {
            event_types: event_types.into_iter().map(Into::into).collect(),
            reactor: Arc::new(reactor),
        });
        self
    }

    pub fn add<R>(&mut self, reactor: R) -> &mut Self
    where
        R: Reactor<A, E> + 'static,
    {
        let types: Vec<String> = reactor.event_types().iter().map(|t| t.to_string()).collect();
        self.register(reactor, types)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.registrations
            .iter()
            .any(|r| r.event_types.iter().any(|t| t == event_type))
    }

    /// Run matching reactors in registration order and collect their intents.
    pub fn react(&self, event: &E, aggregate: &A) -> Reactions {
        let event_type = event.event_type();
        let mut reactions = Reactions::default();

        for reg in self
            .registrations
            .iter()
            .filter(|r| r.event_types.iter().any(|t| t == event_type))
        {
            match reg.reactor.react(event, aggregate) {
                Ok(intents) => reactions.intents.extend(intents),
                Err(error) => {
                    tracing::warn!(
                        reactor = reg.reactor.name(),
                        event_type,
                        error = %error,
                        "reactor failed; continuing with remaining reactors"
                    );
                    reactions.failures.push(ReactorFailure {
                        reactor: reg.reactor.name().to_string(),
                        error,
                    });
                }
            }
        }

        reactions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::tests::TallyEvent;
    use serde_json::json;

    fn announcing(label: &'static str) -> FnReactor<impl Fn(&TallyEvent, &i64) -> Result<Vec<ReactionIntent>, ReactorError>> {
        reactor_fn(label, move |_: &TallyEvent, total: &i64| {
            Ok(vec![ReactionIntent::custom(label, json!({ "total": total }))])
        })
    }

    #[test]
    fn collects_intents_in_registration_order() {
        let mut pipeline = ReactorPipeline::new();
        pipeline
            .register(announcing("first"), ["Bumped"])
            .register(announcing("second"), ["Bumped"])
            .register(announcing("other"), ["Reset"]);

        let reactions = pipeline.react(&TallyEvent::Bumped(5), &5);
        let names: Vec<&str> = reactions.intents.iter().map(|i| i.name()).collect();

        assert_eq!(names, vec!["first", "second"]);
        assert!(reactions.failures.is_empty());
    }

    #[test]
    fn failing_reactor_does_not_block_the_rest() {
        let mut pipeline = ReactorPipeline::new();
        pipeline
            .register(
                reactor_fn("broken", |_: &TallyEvent, _: &i64| Err(ReactorError::new("smtp down"))),
                ["Bumped"],
            )
            .register(announcing("after"), ["Bumped"]);

        let reactions = pipeline.react(&TallyEvent::Bumped(1), &1);

        assert_eq!(reactions.intents.len(), 1);
        assert_eq!(reactions.intents[0].name(), "after");
        assert_eq!(
            reactions.failures,
            vec![ReactorFailure {
                reactor: "broken".to_string(),
                error: ReactorError::new("smtp down"),
            }]
        );
    }

    #[test]
    fn no_matching_reactor_yields_nothing() {
        let mut pipeline = ReactorPipeline::new();
        pipeline.register(announcing("only-reset"), ["Reset"]);

        assert_eq!(pipeline.react(&TallyEvent::Bumped(1), &1), Reactions::default());
        assert!(pipeline.handles("Reset"));
    }
}
