//! Messages sent back to agents and the writers that frame them.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;

use netconfd_modules::{CapabilitySet, ErrorKind, Notification, Reply, RpcError};

use super::errors::DispatchError;

/// Every message the server may send on an agent connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The `hello` was accepted.
    Registered {
        /// Registered session.
        session_id: String,
    },
    /// Answer to `get_capabilities`.
    Capabilities {
        /// Server base capabilities followed by module capabilities.
        capabilities: CapabilitySet,
    },
    /// Answer to one `rpc`.
    Reply {
        /// Session the request belonged to.
        session_id: String,
        /// Echo of the request's message id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        /// Outcome.
        reply: Reply,
    },
    /// Event delivered to a subscribed session.
    Notification {
        /// Subscribed session.
        session_id: String,
        /// RFC 3339 timestamp of the event.
        event_time: String,
        /// Stream the event belongs to.
        stream: String,
        /// Event name.
        event: String,
        /// Event content.
        body: Value,
    },
    /// Protocol-level failure not tied to a classified request.
    Error {
        /// Wire category, when the failure maps onto one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
        /// Human-readable description.
        message: String,
    },
}

impl ServerMessage {
    /// Reply to `message_id` of `session_id`.
    #[must_use]
    pub fn reply(session_id: &str, message_id: Option<&str>, reply: Reply) -> Self {
        Self::Reply {
            session_id: session_id.to_owned(),
            message_id: message_id.map(str::to_owned),
            reply,
        }
    }

    /// Delivery of `notification` to `session_id`.
    ///
    /// # Errors
    ///
    /// Returns the formatting error when the event time cannot be rendered
    /// as RFC 3339.
    pub fn notification(
        session_id: &str,
        notification: &Notification,
    ) -> Result<Self, time::error::Format> {
        Ok(Self::Notification {
            session_id: session_id.to_owned(),
            event_time: notification.event_time().format(&Rfc3339)?,
            stream: notification.stream().to_owned(),
            event: notification.event().to_owned(),
            body: notification.body().clone(),
        })
    }

    /// Protocol error derived from a dispatch failure.
    #[must_use]
    pub fn protocol_error(error: &DispatchError) -> Self {
        Self::Error {
            error_kind: None,
            message: error.to_string(),
        }
    }

    /// Protocol error carrying a wire category.
    #[must_use]
    pub fn rpc_error(error: &RpcError) -> Self {
        Self::Error {
            error_kind: Some(error.kind()),
            message: error.message().to_owned(),
        }
    }
}

/// Serialises messages as JSON lines, flushing after each one.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    /// Wraps an output stream.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one message followed by a newline and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error when serialisation or the write fails.
    pub fn write_message(&mut self, message: &ServerMessage) -> Result<(), DispatchError> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

type BoxedWriter = ResponseWriter<Box<dyn Write + Send>>;

/// Response writer shared between a connection loop and the session's
/// notification task. Each message is written under the lock, so lines
/// never interleave.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl fmt::Debug for SharedWriter {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("SharedWriter").finish_non_exhaustive()
    }
}

impl SharedWriter {
    /// Wraps an output stream.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        let boxed: Box<dyn Write + Send> = Box::new(writer);
        Self {
            inner: Arc::new(Mutex::new(ResponseWriter::new(boxed))),
        }
    }

    /// Writes one message.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Internal`] when an earlier writer panicked
    /// mid-line, or the underlying write error.
    pub fn send(&self, message: &ServerMessage) -> Result<(), DispatchError> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| DispatchError::internal("response writer poisoned"))?;
        writer.write_message(message)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn render(message: &ServerMessage) -> String {
        let mut output = Vec::new();
        ResponseWriter::new(&mut output)
            .write_message(message)
            .expect("write message");
        String::from_utf8(output).expect("utf8")
    }

    #[test]
    fn writes_one_line_per_message() {
        let line = render(&ServerMessage::Registered {
            session_id: "3".into(),
        });
        assert_eq!(line, "{\"kind\":\"registered\",\"session_id\":\"3\"}\n");
    }

    #[test]
    fn replies_nest_the_reply_status() {
        let line = render(&ServerMessage::reply(
            "3",
            Some("17"),
            Reply::error(RpcError::missing_parameter("session-id")),
        ));
        assert!(line.contains(r#""kind":"reply""#), "{line}");
        assert!(line.contains(r#""message_id":"17""#), "{line}");
        assert!(line.contains(r#""status":"error""#), "{line}");
        assert!(line.contains(r#""kind":"missing-parameter""#), "{line}");
    }

    #[test]
    fn notifications_render_rfc3339_times() {
        let event = Notification::new("netconf-config-change", json!({"target": "hostname"}))
            .with_event_time(datetime!(2024-05-01 10:00:00 UTC));
        let message = ServerMessage::notification("3", &event).expect("format time");
        let line = render(&message);
        assert!(line.contains(r#""event_time":"2024-05-01T10:00:00Z""#), "{line}");
        assert!(line.contains(r#""stream":"NETCONF""#), "{line}");
    }

    #[test]
    fn protocol_errors_omit_absent_kind() {
        let line = render(&ServerMessage::protocol_error(&DispatchError::malformed(
            "empty request line",
        )));
        assert!(!line.contains("error_kind"), "{line}");
        assert!(line.contains("empty request line"), "{line}");
    }

    #[test]
    fn shared_writer_serialises_concurrent_senders() {
        let buffer = crate::dispatch::test_support::SharedBuffer::default();
        let writer = SharedWriter::new(buffer.clone());
        let threads: Vec<_> = (0..4)
            .map(|index| {
                let sender = writer.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        sender
                            .send(&ServerMessage::Registered {
                                session_id: index.to_string(),
                            })
                            .expect("send");
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("join sender");
        }
        let lines = buffer.lines();
        assert_eq!(lines.len(), 100);
        assert!(lines.iter().all(|line| line.starts_with("{\"kind\":\"registered\"")));
    }
}
