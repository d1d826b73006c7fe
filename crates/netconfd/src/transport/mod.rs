//! Socket transport between the server and its front-end agents.
//!
//! The listener binds the configured endpoint and hands every accepted
//! stream to a [`ConnectionHandler`] on its own thread. The
//! [`ConnectionTable`] keeps a control handle per open connection so the
//! dispatcher can close a session's channel without owning its stream.

mod connections;
mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod test_utils;

#[cfg(test)]
pub(crate) use self::connections::MockSessionTransport;
pub use self::connections::{CloseMode, ConnectionId, ConnectionTable, SessionTransport};
pub use self::errors::{ListenerError, TransportError};
pub use self::handler::{ConnectionHandler, ConnectionStream};
pub use self::listener::{ListenerHandle, SocketListener};
#[cfg(test)]
pub(crate) use self::test_utils::CountingHandler;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
