//! Domain events and the pipelines that consume them.
//!
//! - [`event`]: the `Event` contract and the storable capability
//! - [`envelope`]: a decoded event together with its log position
//! - [`mutator`]: ordered, pure projections onto aggregate state
//! - [`reactor`]: ordered, isolated handlers that emit [`ReactionIntent`]s
//! - [`sink`]: hand-off of intents to whatever executes them

pub mod envelope;
pub mod event;
pub mod intent;
pub mod mutator;
pub mod reactor;
pub mod sink;

pub use envelope::EventEnvelope;
pub use event::{Event, EventKind};
pub use intent::ReactionIntent;
pub use mutator::{MutationAborted, Mutator, MutatorError, MutatorPipeline, mutator_fn};
pub use reactor::{ReactorError, ReactorFailure, Reactions, Reactor, ReactorPipeline, reactor_fn};
pub use sink::{
    ChannelIntentSink, DiscardIntentSink, IntentSink, LoggingIntentSink, RecordingIntentSink,
    SinkError, Subscription,
};
