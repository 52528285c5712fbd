//! Hand-off of reaction intents to an executor.
//!
//! The dispatcher never performs side effects itself. After reactors have run
//! it passes each [`ReactionIntent`] to an [`IntentSink`]; what happens next
//! (sending mail, queueing a job) belongs to the host.
//!
//! Sinks should return quickly. Slow delivery belongs on another thread: the
//! [`ChannelIntentSink`] fans intents out to [`Subscription`]s that a worker
//! drains at its own pace.

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::ReactionIntent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Delivery failed due to internal lock poisoning.
    #[error("intent sink lock poisoned")]
    Poisoned,

    /// The executor behind the sink rejected the intent.
    #[error("intent rejected: {0}")]
    Rejected(String),
}

/// Destination for reaction intents.
pub trait IntentSink: Send + Sync {
    fn deliver(&self, intent: ReactionIntent) -> Result<(), SinkError>;
}

impl<S> IntentSink for Arc<S>
where
    S: IntentSink + ?Sized,
{
    fn deliver(&self, intent: ReactionIntent) -> Result<(), SinkError> {
        (**self).deliver(intent)
    }
}

/// Drops every intent. Default for dispatchers built without a sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardIntentSink;

impl IntentSink for DiscardIntentSink {
    fn deliver(&self, _intent: ReactionIntent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes every intent to the tracing log at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingIntentSink;

impl IntentSink for LoggingIntentSink {
    fn deliver(&self, intent: ReactionIntent) -> Result<(), SinkError> {
        let payload = serde_json::to_string(&intent).unwrap_or_else(|e| format!("<{e}>"));
        tracing::info!(kind = intent.kind(), name = intent.name(), %payload, "reaction intent");
        Ok(())
    }
}

/// Keeps every delivered intent in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingIntentSink {
    delivered: Mutex<Vec<ReactionIntent>>,
}

impl RecordingIntentSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<ReactionIntent> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// How many delivered intents carry `name` (email template or custom name).
    pub fn count_named(&self, name: &str) -> usize {
        self.delivered
            .lock()
            .map(|d| d.iter().filter(|i| i.name() == name).count())
            .unwrap_or(0)
    }
}

impl IntentSink for RecordingIntentSink {
    fn deliver(&self, intent: ReactionIntent) -> Result<(), SinkError> {
        self.delivered
            .lock()
            .map_err(|_| SinkError::Poisoned)?
            .push(intent);
        Ok(())
    }
}

/// A subscription to a [`ChannelIntentSink`].
///
/// Designed for single-threaded consumption: one worker thread per
/// subscription.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Broadcasts intents to every live subscriber.
///
/// - No IO, no async
/// - Subscribers that hung up are dropped on the next delivery
/// - Intents delivered before a subscriber subscribed are not replayed to it
#[derive(Debug, Default)]
pub struct ChannelIntentSink {
    subscribers: Mutex<Vec<mpsc::Sender<ReactionIntent>>>,
}

impl ChannelIntentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<ReactionIntent> {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still hands out a subscription; it just never
        // receives anything.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}

impl IntentSink for ChannelIntentSink {
    fn deliver(&self, intent: ReactionIntent) -> Result<(), SinkError> {
        let mut subs = self.subscribers.lock().map_err(|_| SinkError::Poisoned)?;
        subs.retain(|tx| tx.send(intent.clone()).is_ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broke() -> ReactionIntent {
        ReactionIntent::email("AccountBroke", "owner@example.com", json!({}))
    }

    #[test]
    fn recording_sink_counts_by_name() {
        let sink = RecordingIntentSink::new();
        sink.deliver(broke()).unwrap();
        sink.deliver(ReactionIntent::custom("audit", json!(null))).unwrap();
        sink.deliver(broke()).unwrap();

        assert_eq!(sink.delivered().len(), 3);
        assert_eq!(sink.count_named("AccountBroke"), 2);
        assert_eq!(sink.count_named("Welcome"), 0);
    }

    #[test]
    fn channel_sink_fans_out_to_subscribers() {
        let sink = ChannelIntentSink::new();
        let a = sink.subscribe();
        let b = sink.subscribe();

        sink.deliver(broke()).unwrap();

        assert_eq!(a.recv_timeout(Duration::from_secs(1)).unwrap(), broke());
        assert_eq!(b.try_recv().unwrap(), broke());
    }

    #[test]
    fn channel_sink_forgets_dropped_subscribers() {
        let sink = ChannelIntentSink::new();
        drop(sink.subscribe());
        let live = sink.subscribe();

        sink.deliver(broke()).unwrap();
        sink.deliver(broke()).unwrap();

        assert_eq!(sink.subscribers.lock().unwrap().len(), 1);
        assert!(live.try_recv().is_ok());
        assert!(live.try_recv().is_ok());
    }
}
