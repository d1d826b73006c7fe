//! Messages sent by front-end agents.
//!
//! Each agent connection carries JSON lines. The first message registers
//! the session the agent fronts; every later `rpc` message names that
//! session and one operation:
//!
//! ```json
//! {"kind":"hello","session_id":"17","username":"admin","capabilities":["urn:ietf:params:netconf:base:1.1"]}
//! {"kind":"rpc","session_id":"17","message_id":"101","operation":"set-hostname","payload":"edge1"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use netconfd_modules::CapabilitySet;

use super::errors::DispatchError;

/// Operation families the dispatcher distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// `close-session` and `kill-session`.
    Lifecycle,
    /// Anything routed to device modules.
    Device,
    /// `create-subscription`.
    Notification,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Lifecycle => "lifecycle",
            Self::Device => "device",
            Self::Notification => "notification",
        })
    }
}

/// Session registration sent once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Identifier chosen by the transport for the session.
    pub session_id: String,
    /// Authenticated user.
    pub username: String,
    /// Capabilities negotiated with the client.
    #[serde(default)]
    pub capabilities: CapabilitySet,
}

/// One management operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Session the request belongs to.
    pub session_id: String,
    /// Correlation identifier echoed in the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Operation name.
    pub operation: String,
    /// Explicit family; inferred from the name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_kind: Option<OperationKind>,
    /// Operation input, passed through to modules untouched.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl RpcRequest {
    /// Builds a request without explicit kind or payload.
    #[must_use]
    pub fn new(session_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: None,
            operation: operation.into(),
            op_kind: None,
            payload: Value::Null,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the correlation identifier.
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Sets an explicit operation kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: OperationKind) -> Self {
        self.op_kind = Some(kind);
        self
    }

    /// Operation name without surrounding whitespace.
    #[must_use]
    pub fn operation(&self) -> &str {
        self.operation.trim()
    }
}

/// Every message an agent may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Registers the connection's session.
    Hello(Hello),
    /// Asks for the server's capability list.
    GetCapabilities,
    /// Runs an operation.
    Rpc(RpcRequest),
}

impl AgentMessage {
    /// Parses one JSON line. Trailing whitespace, including the newline,
    /// is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MalformedJsonl`] for blank or non-matching
    /// input.
    pub fn parse(line: &[u8]) -> Result<Self, DispatchError> {
        let trimmed = trim_trailing_whitespace(line);
        if trimmed.is_empty() {
            return Err(DispatchError::malformed("empty request line"));
        }
        serde_json::from_slice(trimmed).map_err(DispatchError::from_json_error)
    }

    /// Checks that identifying fields are usable.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidStructure`] for a blank session id,
    /// user name or operation.
    pub fn validate(&self) -> Result<(), DispatchError> {
        match self {
            Self::Hello(hello) => {
                require(&hello.session_id, "session_id")?;
                require(&hello.username, "username")
            }
            Self::GetCapabilities => Ok(()),
            Self::Rpc(request) => {
                require(&request.session_id, "session_id")?;
                require(&request.operation, "operation")
            }
        }
    }
}

fn require(value: &str, field: &str) -> Result<(), DispatchError> {
    if value.trim().is_empty() {
        return Err(DispatchError::invalid_structure(format!(
            "{field} field is empty"
        )));
    }
    Ok(())
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(0, |position| position + 1);
    bytes.get(..end).unwrap_or_default()
}
