//! Table of open agent connections.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::Shutdown;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::{ConnectionStream, LISTENER_TARGET, TransportError};

/// Identifier of one accepted connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "c{}", self.0)
    }
}

/// How a connection is to be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// The owning loop ends once the in-flight reply is written.
    AfterReply,
    /// The socket is shut down now, interrupting the owning loop.
    Immediate,
}

/// Transport operations the dispatcher relies on.
#[cfg_attr(test, mockall::automock)]
pub trait SessionTransport: Send + Sync {
    /// Closes the connection carrying a session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnknownConnection`] when the connection is
    /// gone and [`TransportError::Shutdown`] when the socket refuses to shut
    /// down.
    fn close_connection(&self, conn_id: ConnectionId, mode: CloseMode)
    -> Result<(), TransportError>;
}

struct ConnectionEntry {
    control: ConnectionStream,
    closing: bool,
}

/// Control handles for every open connection.
pub struct ConnectionTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for ConnectionTable {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionTable")
            .field("open", &self.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new connection and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the control handle cannot be cloned.
    pub fn register(&self, stream: &ConnectionStream) -> io::Result<ConnectionId> {
        let control = stream.try_clone()?;
        let conn_id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries().insert(
            conn_id,
            ConnectionEntry {
                control,
                closing: false,
            },
        );
        debug!(target: LISTENER_TARGET, %conn_id, "connection registered");
        Ok(conn_id)
    }

    /// Forgets a connection. The caller still owns its stream.
    pub fn unregister(&self, conn_id: ConnectionId) {
        if self.entries().remove(&conn_id).is_some() {
            debug!(target: LISTENER_TARGET, %conn_id, "connection unregistered");
        }
    }

    /// Whether a close was requested for the connection. Unknown
    /// connections count as closing.
    #[must_use]
    pub fn is_closing(&self, conn_id: ConnectionId) -> bool {
        self.entries()
            .get(&conn_id)
            .is_none_or(|entry| entry.closing)
    }

    /// Shuts every open connection down. Returns how many were open.
    pub fn shutdown_all(&self) -> usize {
        let mut entries = self.entries();
        for (conn_id, entry) in entries.iter_mut() {
            entry.closing = true;
            if let Err(error) = entry.control.shutdown(Shutdown::Both) {
                warn!(target: LISTENER_TARGET, %conn_id, %error, "connection shutdown failed");
            }
        }
        entries.len()
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no connection is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionTransport for ConnectionTable {
    fn close_connection(
        &self,
        conn_id: ConnectionId,
        mode: CloseMode,
    ) -> Result<(), TransportError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(&conn_id)
            .ok_or(TransportError::UnknownConnection { conn_id })?;
        entry.closing = true;
        if mode == CloseMode::Immediate {
            entry
                .control
                .shutdown(Shutdown::Both)
                .map_err(|source| TransportError::Shutdown { conn_id, source })?;
        }
        debug!(target: LISTENER_TARGET, %conn_id, ?mode, "connection close requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};

    use super::*;

    fn pair() -> (ConnectionStream, TcpStream) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (server, _) = listener.accept().expect("accept");
        (ConnectionStream::Tcp(server), client)
    }

    #[test]
    fn identifiers_are_unique() {
        let table = ConnectionTable::new();
        let (first, _a) = pair();
        let (second, _b) = pair();
        let one = table.register(&first).expect("register");
        let two = table.register(&second).expect("register");
        assert_ne!(one, two);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn after_reply_only_flags_the_connection() {
        let table = ConnectionTable::new();
        let (stream, _client) = pair();
        let conn_id = table.register(&stream).expect("register");
        assert!(!table.is_closing(conn_id));

        table
            .close_connection(conn_id, CloseMode::AfterReply)
            .expect("close");
        assert!(table.is_closing(conn_id));
    }

    #[test]
    fn immediate_close_ends_the_peer_stream() {
        let table = ConnectionTable::new();
        let (stream, mut client) = pair();
        let conn_id = table.register(&stream).expect("register");

        table
            .close_connection(conn_id, CloseMode::Immediate)
            .expect("close");

        let mut buffer = [0_u8; 8];
        assert_eq!(client.read(&mut buffer).expect("read"), 0);
    }

    #[test]
    fn unknown_connections_are_reported() {
        let table = ConnectionTable::new();
        let error = table
            .close_connection(ConnectionId::new(99), CloseMode::AfterReply)
            .expect_err("unknown connection");
        assert!(matches!(error, TransportError::UnknownConnection { .. }));
        assert!(table.is_closing(ConnectionId::new(99)));
    }

    #[test]
    fn unregister_forgets_the_connection() {
        let table = ConnectionTable::new();
        let (stream, _client) = pair();
        let conn_id = table.register(&stream).expect("register");
        table.unregister(conn_id);
        assert!(table.is_empty());
    }
}
