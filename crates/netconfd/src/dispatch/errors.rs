//! Protocol-level failures of the agent connection.
//!
//! These never reach a device module: they describe input the server could
//! not turn into a request, or a connection that can no longer be written.
//! Failures of a classified request travel as error replies instead.

use std::io;

use thiserror::Error;

/// Errors surfaced while reading, parsing or answering agent messages.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The line is not JSON or does not match any message shape.
    #[error("malformed JSONL: {message}")]
    MalformedJsonl {
        /// Parser diagnostic.
        message: String,
        /// Underlying serde error, when there is one.
        #[source]
        source: Option<serde_json::Error>,
    },

    /// The message parsed but a required field is unusable.
    #[error("invalid request structure: {message}")]
    InvalidStructure {
        /// What was wrong.
        message: String,
    },

    /// An RPC arrived before the connection registered a session.
    #[error("no session is registered on this connection")]
    NoSession,

    /// A line exceeded the size limit.
    #[error("request too large: {size} bytes exceeds {max_size} byte limit")]
    RequestTooLarge {
        /// Bytes buffered when the limit tripped.
        size: usize,
        /// Configured limit.
        max_size: usize,
    },

    /// Reading or writing the socket failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A response could not be serialised.
    #[error("failed to serialize response: {0}")]
    SerializeResponse(#[from] serde_json::Error),

    /// Shared state was left unusable by a panic.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the fault.
        message: String,
    },
}

impl DispatchError {
    /// Whether the connection can keep serving after reporting the error.
    ///
    /// Bad input is answered and the loop continues; transport and internal
    /// faults end the connection.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedJsonl { .. } | Self::InvalidStructure { .. } | Self::NoSession
        )
    }

    /// Wraps a serde failure as malformed input.
    #[must_use]
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedJsonl {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Malformed input with a custom message.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedJsonl {
            message: message.into(),
            source: None,
        }
    }

    /// Structurally invalid message.
    #[must_use]
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Oversized line.
    #[must_use]
    pub const fn request_too_large(size: usize, max_size: usize) -> Self {
        Self::RequestTooLarge { size, max_size }
    }

    /// Internal fault.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
