//! Per-session fan-out of log events
//!
//! Every published event is appended to the session's history and sent on a
//! `tokio::sync::broadcast` channel. A new subscriber gets a snapshot of the
//! history followed by live events; both are taken under the same lock as
//! `publish`, so nothing is missed or duplicated at the seam.
//!
//! Publishing never waits on observers. Each observer has a bounded window
//! (`capacity`); an observer that falls further behind loses the oldest
//! events and receives a single [`Delivery::Dropped`] marker in their place.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::events::{EventKind, LogEvent};
use crate::metrics::DROPPED_DELIVERIES;

/// What an observer receives
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(LogEvent),
    /// The observer fell behind and this many events were skipped
    Dropped(u64),
}

struct ChannelState {
    history: Vec<LogEvent>,
    sender: Option<broadcast::Sender<LogEvent>>,
    next_seq: u64,
}

/// Event log and live fan-out for one session
pub struct BroadcastChannel {
    session_id: String,
    state: Mutex<ChannelState>,
    observers: Arc<AtomicUsize>,
}

impl BroadcastChannel {
    /// Create a channel whose observers may lag by at most `capacity` events
    pub fn new(session_id: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            session_id: session_id.into(),
            state: Mutex::new(ChannelState {
                history: Vec::new(),
                sender: Some(sender),
                next_seq: 0,
            }),
            observers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // A panic while holding the lock can't leave the history half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event and deliver it to every attached observer
    ///
    /// Returns the assigned sequence number, or `None` once the channel is
    /// closed.
    pub fn publish(&self, mut event: LogEvent) -> Option<u64> {
        let mut state = self.lock();
        let Some(sender) = state.sender.clone() else {
            debug!(session_id = %self.session_id, kind = event.kind.as_str(), "Publish after close ignored");
            return None;
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        event.seq = seq;
        event.timestamp = Utc::now();

        state.history.push(event.clone());
        // No receivers is fine: the event is still in the history
        let _ = sender.send(event);
        Some(seq)
    }

    /// Attach a new observer
    pub fn subscribe(&self) -> Subscription {
        let state = self.lock();
        let live = state.sender.as_ref().map(|s| s.subscribe());
        Subscription {
            backlog: state.history.iter().cloned().collect(),
            live,
            _guard: ObserverGuard::new(Arc::clone(&self.observers)),
        }
    }

    /// Stop accepting events; observers drain what they have and then end
    pub fn close(&self) {
        self.lock().sender = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().sender.is_none()
    }

    /// Snapshot of every event published so far
    pub fn history(&self) -> Vec<LogEvent> {
        self.lock().history.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of subscriptions currently alive
    pub fn observer_count(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }

    /// Emitter that stamps events with this session and an optional persona
    pub fn emitter(self: &Arc<Self>, persona_name: Option<String>) -> EventEmitter {
        EventEmitter {
            channel: Arc::clone(self),
            persona_name,
        }
    }
}

/// A live subscription to one session's events
pub struct Subscription {
    backlog: VecDeque<LogEvent>,
    live: Option<broadcast::Receiver<LogEvent>>,
    _guard: ObserverGuard,
}

impl Subscription {
    /// Next delivery, or `None` once the session's channel is closed and drained
    pub async fn next(&mut self) -> Option<Delivery> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(Delivery::Event(event));
        }
        let rx = self.live.as_mut()?;
        match rx.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                DROPPED_DELIVERIES.inc_by(n as f64);
                Some(Delivery::Dropped(n))
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.live = None;
                None
            }
        }
    }

    pub fn into_stream(mut self) -> impl Stream<Item = Delivery> + Send {
        async_stream::stream! {
            while let Some(delivery) = self.next().await {
                yield delivery;
            }
        }
    }
}

struct ObserverGuard(Arc<AtomicUsize>);

impl ObserverGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cheap handle for publishing events on behalf of one producer
#[derive(Clone)]
pub struct EventEmitter {
    channel: Arc<BroadcastChannel>,
    persona_name: Option<String>,
}

impl EventEmitter {
    pub fn emit(&self, kind: EventKind, message: impl Into<String>, data: Option<Value>) {
        let mut event = LogEvent::new(
            self.channel.session_id(),
            self.persona_name.clone(),
            kind,
            message,
        );
        event.data = data;
        self.channel.publish(event);
    }

    pub fn persona_name(&self) -> Option<&str> {
        self.persona_name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn event(message: &str) -> LogEvent {
        LogEvent::new("s", None, EventKind::Thinking, message)
    }

    fn messages(deliveries: &[Delivery]) -> Vec<String> {
        deliveries
            .iter()
            .filter_map(|d| match d {
                Delivery::Event(e) => Some(e.message.clone()),
                Delivery::Dropped(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_early_subscriber_sees_emission_order() {
        let channel = BroadcastChannel::new("s", 64);
        let sub = channel.subscribe();

        for i in 0..20 {
            channel.publish(event(&i.to_string()));
        }
        channel.close();

        let got: Vec<Delivery> = sub.into_stream().collect().await;
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(messages(&got), expected);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_full_history() {
        let channel = BroadcastChannel::new("s", 4);
        for i in 0..10 {
            channel.publish(event(&i.to_string()));
        }
        channel.close();

        // History is not bounded by the per-observer window
        let got: Vec<Delivery> = channel.subscribe().into_stream().collect().await;
        assert_eq!(got.len(), 10);
        let seqs: Vec<u64> = got
            .iter()
            .filter_map(|d| match d {
                Delivery::Event(e) => Some(e.seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, (0..10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_mid_stream_subscriber_has_no_gap_or_duplicate() {
        let channel = BroadcastChannel::new("s", 64);
        channel.publish(event("a"));
        channel.publish(event("b"));
        let sub = channel.subscribe();
        channel.publish(event("c"));
        channel.close();

        let got: Vec<Delivery> = sub.into_stream().collect().await;
        assert_eq!(messages(&got), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_slow_observer_drops_oldest_and_is_flagged() {
        let channel = BroadcastChannel::new("s", 4);
        let mut slow = channel.subscribe();

        // Producer never blocks even though nobody is reading
        for i in 0..10 {
            assert_eq!(channel.publish(event(&i.to_string())), Some(i));
        }
        channel.close();

        let first = slow.next().await.unwrap();
        assert_eq!(first, Delivery::Dropped(6));

        let mut rest = Vec::new();
        while let Some(d) = slow.next().await {
            rest.push(d);
        }
        assert_eq!(messages(&rest), vec!["6", "7", "8", "9"]);
    }

    #[tokio::test]
    async fn test_observer_count_tracks_subscriptions() {
        let channel = BroadcastChannel::new("s", 8);
        assert_eq!(channel.observer_count(), 0);
        let a = channel.subscribe();
        let b = channel.subscribe();
        assert_eq!(channel.observer_count(), 2);
        drop(a);
        assert_eq!(channel.observer_count(), 1);
        drop(b);
        assert_eq!(channel.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_after_close_is_ignored() {
        let channel = Arc::new(BroadcastChannel::new("s", 8));
        channel.emitter(Some("Casey".into())).emit(EventKind::Acting, "one", None);
        channel.close();
        assert!(channel.publish(event("two")).is_none());

        let history = channel.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].persona_name.as_deref(), Some("Casey"));
        assert_eq!(history[0].session_id, "s");
    }
}
