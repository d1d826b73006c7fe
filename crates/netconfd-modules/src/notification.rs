//! In-process event notification bus.
//!
//! Device modules publish events through the [`NotificationBus`] handed to
//! them at initialisation. Each subscribing session holds a
//! [`NotificationSubscription`] which receives events published after it was
//! created, optionally preceded by a replay of retained history.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;

/// Name of the default event stream.
pub const NETCONF_STREAM: &str = "NETCONF";

/// Number of events retained for replay when no capacity is given.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// A single event notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    event_time: OffsetDateTime,
    stream: String,
    event: String,
    body: Value,
}

impl Notification {
    /// Creates an event on the default stream timestamped now.
    #[must_use]
    pub fn new(event: impl Into<String>, body: Value) -> Self {
        Self {
            event_time: OffsetDateTime::now_utc(),
            stream: NETCONF_STREAM.to_owned(),
            event: event.into(),
            body,
        }
    }

    /// Overrides the event timestamp.
    #[must_use]
    pub fn with_event_time(mut self, event_time: OffsetDateTime) -> Self {
        self.event_time = event_time;
        self
    }

    /// When the event occurred.
    #[must_use]
    pub const fn event_time(&self) -> OffsetDateTime {
        self.event_time
    }

    /// Stream the event belongs to.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Event name.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Event payload.
    #[must_use]
    pub const fn body(&self) -> &Value {
        &self.body
    }
}

#[derive(Debug)]
struct BusState {
    subscribers: Vec<(u64, Sender<Notification>)>,
    history: VecDeque<Notification>,
    capacity: usize,
    next_id: u64,
}

/// Cloneable handle to a shared notification bus.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    state: Arc<Mutex<BusState>>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::with_history(DEFAULT_HISTORY_CAPACITY)
    }
}

impl NotificationBus {
    /// Creates a bus retaining up to `capacity` events for replay.
    #[must_use]
    pub fn with_history(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                subscribers: Vec::new(),
                history: VecDeque::with_capacity(capacity),
                capacity,
                next_id: 0,
            })),
        }
    }

    // Every critical section leaves the state consistent, so a poisoned lock
    // is still safe to reuse.
    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `notification` and delivers it to every live subscriber.
    ///
    /// Returns the number of subscribers the event reached.
    pub fn publish(&self, notification: Notification) -> usize {
        let mut state = self.state();
        state
            .subscribers
            .retain(|(_, sender)| sender.send(notification.clone()).is_ok());
        let delivered = state.subscribers.len();
        if state.capacity > 0 {
            if state.history.len() == state.capacity {
                state.history.pop_front();
            }
            state.history.push_back(notification);
        }
        delivered
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> NotificationSubscription {
        self.subscribe_with_replay(None, None).1
    }

    /// Subscribes and atomically collects retained events whose timestamp
    /// lies in `[start, stop]`.
    ///
    /// With no `start` the replay is empty. No event is lost or duplicated
    /// between the replay and the live subscription.
    #[must_use]
    pub fn subscribe_with_replay(
        &self,
        start: Option<OffsetDateTime>,
        stop: Option<OffsetDateTime>,
    ) -> (Vec<Notification>, NotificationSubscription) {
        let mut state = self.state();
        let replay = start.map_or_else(Vec::new, |from| {
            state
                .history
                .iter()
                .filter(|event| {
                    event.event_time >= from && stop.is_none_or(|until| event.event_time <= until)
                })
                .cloned()
                .collect()
        });
        let (sender, receiver) = mpsc::channel();
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.subscribers.push((id, sender));
        drop(state);
        (
            replay,
            NotificationSubscription {
                id,
                receiver,
                bus: self.clone(),
            },
        )
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    fn unsubscribe(&self, id: u64) {
        self.state().subscribers.retain(|(held, _)| *held != id);
    }
}

/// Receiving end of a bus subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct NotificationSubscription {
    id: u64,
    receiver: Receiver<Notification>,
    bus: NotificationBus,
}

impl NotificationSubscription {
    /// Waits up to `timeout` for the next event.
    ///
    /// # Errors
    ///
    /// Returns [`RecvTimeoutError::Timeout`] when nothing arrived in time.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Notification, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
