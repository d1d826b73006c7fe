//! Notification subscriptions and their delivery task.
//!
//! A successful `create-subscription` starts one background thread per
//! session. The thread waits until the `ok` reply has been written, replays
//! retained history when a start time was requested, then streams live
//! events until the session is torn down, a write fails or the stop time
//! passes.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use netconfd_modules::notification::NETCONF_STREAM;
use netconfd_modules::{Notification, NotificationSubscription, RpcError};

use super::DISPATCH_TARGET;
use super::response::{ServerMessage, SharedWriter};

/// Event sent once the replayed history has been delivered.
pub const REPLAY_COMPLETE: &str = "replay-complete";
/// Event sent when the stop time has passed and the subscription ends.
pub const NOTIFICATION_COMPLETE: &str = "notification-complete";

/// Validated `create-subscription` input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionParams {
    stream: String,
    start_time: Option<OffsetDateTime>,
    stop_time: Option<OffsetDateTime>,
}

impl SubscriptionParams {
    /// Reads `stream`, `startTime` and `stopTime` from a request payload.
    ///
    /// `now` is the reference for rejecting start times in the future.
    ///
    /// # Errors
    ///
    /// Returns an `invalid-value` error for an unknown stream, a malformed
    /// timestamp, a stop time without start time or an inverted window.
    pub fn from_payload(payload: &Value, now: OffsetDateTime) -> Result<Self, RpcError> {
        if !payload.is_null() && !payload.is_object() {
            return Err(RpcError::invalid_value(
                "create-subscription",
                "subscription parameters must be an object",
            ));
        }
        let stream = string_field(payload, "stream")?.unwrap_or(NETCONF_STREAM);
        if stream != NETCONF_STREAM {
            return Err(RpcError::invalid_value(
                "stream",
                format!("unknown event stream '{stream}'"),
            ));
        }
        let start_time = timestamp_field(payload, "startTime")?;
        let stop_time = timestamp_field(payload, "stopTime")?;
        match (start_time, stop_time) {
            (None, Some(_)) => Err(RpcError::invalid_value(
                "stopTime",
                "stopTime requires startTime",
            )),
            (Some(start), _) if start > now => Err(RpcError::invalid_value(
                "startTime",
                "startTime lies in the future",
            )),
            (Some(start), Some(stop)) if start > stop => Err(RpcError::invalid_value(
                "stopTime",
                "stopTime precedes startTime",
            )),
            _ => Ok(Self {
                stream: stream.to_owned(),
                start_time,
                stop_time,
            }),
        }
    }

    /// Requested stream.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Start of the replay window.
    #[must_use]
    pub const fn start_time(&self) -> Option<OffsetDateTime> {
        self.start_time
    }

    /// End of the subscription.
    #[must_use]
    pub const fn stop_time(&self) -> Option<OffsetDateTime> {
        self.stop_time
    }
}

fn string_field<'a>(payload: &'a Value, key: &str) -> Result<Option<&'a str>, RpcError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.trim())),
        Some(_) => Err(RpcError::invalid_value(key, format!("{key} must be a string"))),
    }
}

fn timestamp_field(payload: &Value, key: &str) -> Result<Option<OffsetDateTime>, RpcError> {
    string_field(payload, key)?
        .map(|text| {
            OffsetDateTime::parse(text, &Rfc3339).map_err(|error| {
                RpcError::invalid_value(key, format!("{key} is not an RFC 3339 timestamp: {error}"))
            })
        })
        .transpose()
}

/// Releases the delivery task once the subscription's reply is on the wire.
///
/// Dropping the gate unopened stops the task before it writes anything.
#[derive(Debug)]
pub(crate) struct ReplyGate {
    sender: Sender<()>,
}

impl ReplyGate {
    pub(crate) fn open(self) {
        // A send error means the task already stopped.
        self.sender.send(()).ok();
    }
}

/// Owner's handle on a running delivery task.
#[derive(Debug)]
pub(crate) struct SubscriptionHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Asks the task to stop and waits for it.
    pub(crate) fn cancel_and_join(mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: DISPATCH_TARGET, "notification task panicked");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Everything the delivery thread needs.
pub(crate) struct DeliveryTask {
    pub(crate) session_id: String,
    pub(crate) params: SubscriptionParams,
    pub(crate) replay: Vec<Notification>,
    pub(crate) subscription: NotificationSubscription,
    pub(crate) writer: SharedWriter,
    pub(crate) poll_interval: Duration,
}

impl DeliveryTask {
    /// Starts the delivery thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the thread cannot be spawned.
    pub(crate) fn spawn(self) -> io::Result<(SubscriptionHandle, ReplyGate)> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::channel();
        let flag = Arc::clone(&cancel);
        let thread = thread::Builder::new()
            .name(format!("netconfd-notify-{}", self.session_id))
            .spawn(move || self.run(&flag, &receiver))?;
        Ok((
            SubscriptionHandle {
                cancel,
                thread: Some(thread),
            },
            ReplyGate { sender },
        ))
    }

    fn run(self, cancel: &AtomicBool, gate: &Receiver<()>) {
        if !self.await_gate(cancel, gate) {
            debug!(
                target: DISPATCH_TARGET,
                session = %self.session_id,
                "subscription abandoned before its reply"
            );
            return;
        }
        for event in &self.replay {
            if !self.deliver(event) {
                return;
            }
        }
        if self.params.start_time().is_some()
            && !self.deliver(&Notification::new(REPLAY_COMPLETE, Value::Null))
        {
            return;
        }
        self.stream_live(cancel);
        debug!(target: DISPATCH_TARGET, session = %self.session_id, "subscription ended");
    }

    fn await_gate(&self, cancel: &AtomicBool, gate: &Receiver<()>) -> bool {
        loop {
            if cancel.load(Ordering::SeqCst) {
                return false;
            }
            match gate.recv_timeout(self.poll_interval) {
                Ok(()) => return true,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn stream_live(&self, cancel: &AtomicBool) {
        while !cancel.load(Ordering::SeqCst) {
            let wait = match self.params.stop_time() {
                Some(stop) => {
                    let now = OffsetDateTime::now_utc();
                    if stop <= now {
                        self.deliver(&Notification::new(NOTIFICATION_COMPLETE, Value::Null));
                        return;
                    }
                    Duration::try_from(stop - now)
                        .map_or(Duration::ZERO, |remaining| remaining.min(self.poll_interval))
                }
                None => self.poll_interval,
            };
            match self.subscription.recv_timeout(wait) {
                Ok(event) => {
                    if event.stream() == self.params.stream()
                        && self
                            .params
                            .stop_time()
                            .is_none_or(|stop| event.event_time() <= stop)
                        && !self.deliver(&event)
                    {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn deliver(&self, event: &Notification) -> bool {
        let message = match ServerMessage::notification(&self.session_id, event) {
            Ok(message) => message,
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "failed to format event time");
                return false;
            }
        };
        match self.writer.send(&message) {
            Ok(()) => true,
            Err(error) => {
                debug!(
                    target: DISPATCH_TARGET,
                    session = %self.session_id,
                    %error,
                    "notification write failed"
                );
                false
            }
        }
    }
}
