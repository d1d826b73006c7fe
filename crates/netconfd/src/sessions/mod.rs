//! Live session bookkeeping.
//!
//! The [`SessionRegistry`] owns one [`Session`] record per established agent
//! session, indexed both by the session identifier the agent chose and by
//! the connection that carries it. Every operation takes the same mutex, so
//! the registry behaves as a single linearizable map: two racing `add` calls
//! for one identifier cannot both succeed, and a finished `remove` is seen by
//! every later lookup from any thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::debug;

use netconfd_modules::{CapabilitySet, ErrorKind, RpcError, SessionContext};

use crate::dispatch::SubscriptionHandle;
use crate::transport::ConnectionId;

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::sessions");

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Accepting requests.
    Active,
    /// A close, kill or hang-up is in progress; no further requests run.
    Terminating,
    /// Removed from the registry. Never reused.
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Active => "active",
            Self::Terminating => "terminating",
            Self::Closed => "closed",
        })
    }
}

/// Errors raised by the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Another live session already uses the identifier.
    #[error("session '{session_id}' already exists")]
    DuplicateSession {
        /// Identifier supplied at registration.
        session_id: String,
    },
    /// The connection already carries a session.
    #[error("connection {conn_id} already carries session '{owner}'")]
    ConnectionInUse {
        /// Connection the registration arrived on.
        conn_id: ConnectionId,
        /// Session already bound to the connection.
        owner: String,
    },
    /// No live session has the identifier.
    #[error("no session with id '{session_id}'")]
    NotFound {
        /// Identifier that was looked up.
        session_id: String,
    },
    /// The identifier is empty or whitespace.
    #[error("session id must not be blank")]
    BlankId,
}

impl SessionError {
    /// Wire error kind the failure is reported as.
    #[must_use]
    pub const fn error_kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateSession { .. } => ErrorKind::DuplicateSession,
            Self::ConnectionInUse { .. } => ErrorKind::OperationFailed,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::BlankId => ErrorKind::InvalidValue,
        }
    }

    /// Converts the failure into an error reply body.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        let error = RpcError::new(self.error_kind(), self.to_string());
        match self {
            Self::BlankId => error.with_bad_element("session-id"),
            _ => error,
        }
    }
}

/// One established client session.
pub struct Session {
    id: String,
    conn_id: ConnectionId,
    context: SessionContext,
    status: Mutex<SessionStatus>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("id", &self.id)
            .field("conn_id", &self.conn_id)
            .field("username", &self.context.username())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(
        id: String,
        username: String,
        capabilities: CapabilitySet,
        conn_id: ConnectionId,
    ) -> Self {
        Self {
            context: SessionContext::new(id.clone(), username, capabilities),
            id,
            conn_id,
            status: Mutex::new(SessionStatus::Active),
            subscription: Mutex::new(None),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connection carrying the session.
    #[must_use]
    pub const fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Authenticated user.
    #[must_use]
    pub fn username(&self) -> &str {
        self.context.username()
    }

    /// Capabilities negotiated at handshake.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySet {
        self.context.capabilities()
    }

    /// View handed to device modules.
    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether requests may still be dispatched for the session.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == SessionStatus::Active
    }

    /// Moves an active session to [`SessionStatus::Terminating`].
    ///
    /// Returns `false` when the session was already terminating or closed.
    pub fn mark_terminating(&self) -> bool {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == SessionStatus::Active {
            *status = SessionStatus::Terminating;
            true
        } else {
            false
        }
    }

    /// Whether a notification subscription is still delivering.
    #[must_use]
    pub fn has_active_subscription(&self) -> bool {
        self.subscription_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Binds a subscription to the session.
    ///
    /// A finished subscription occupying the slot is reaped first. When a
    /// live one is still attached the new handle is handed back untouched.
    pub(crate) fn attach_subscription(
        &self,
        handle: SubscriptionHandle,
    ) -> Result<(), SubscriptionHandle> {
        let mut slot = self.subscription_slot();
        if slot.as_ref().is_some_and(|current| !current.is_finished()) {
            return Err(handle);
        }
        if let Some(finished) = slot.replace(handle) {
            finished.cancel_and_join();
        }
        Ok(())
    }

    fn close(&self) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = SessionStatus::Closed;
        let subscription = self.subscription_slot().take();
        if let Some(handle) = subscription {
            handle.cancel_and_join();
        }
    }

    fn subscription_slot(&self) -> MutexGuard<'_, Option<SubscriptionHandle>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct SessionMaps {
    by_id: HashMap<String, Arc<Session>>,
    by_conn: HashMap<ConnectionId, String>,
}

/// Concurrent map of live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    maps: Mutex<SessionMaps>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session established on `conn_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DuplicateSession`] when the identifier is
    /// live, [`SessionError::ConnectionInUse`] when the connection already
    /// carries a session and [`SessionError::BlankId`] for an empty id.
    pub fn add(
        &self,
        session_id: &str,
        username: &str,
        capabilities: CapabilitySet,
        conn_id: ConnectionId,
    ) -> Result<Arc<Session>, SessionError> {
        if session_id.trim().is_empty() {
            return Err(SessionError::BlankId);
        }
        let mut maps = self.maps();
        if maps.by_id.contains_key(session_id) {
            return Err(SessionError::DuplicateSession {
                session_id: session_id.to_owned(),
            });
        }
        if let Some(owner) = maps.by_conn.get(&conn_id) {
            return Err(SessionError::ConnectionInUse {
                conn_id,
                owner: owner.clone(),
            });
        }
        let session = Arc::new(Session::new(
            session_id.to_owned(),
            username.to_owned(),
            capabilities,
            conn_id,
        ));
        maps.by_id
            .insert(session_id.to_owned(), Arc::clone(&session));
        maps.by_conn.insert(conn_id, session_id.to_owned());
        debug!(
            target: SESSION_TARGET,
            session = session_id,
            %conn_id,
            username,
            "session registered"
        );
        Ok(session)
    }

    /// Looks a session up by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] when no live session matches.
    pub fn get_by_id(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        self.maps()
            .by_id
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.to_owned(),
            })
    }

    /// Looks up the session carried by a connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] when the connection carries none.
    pub fn get_by_conn_id(&self, conn_id: ConnectionId) -> Result<Arc<Session>, SessionError> {
        let maps = self.maps();
        maps.by_conn
            .get(&conn_id)
            .and_then(|id| maps.by_id.get(id))
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                session_id: format!("<connection {conn_id}>"),
            })
    }

    /// Removes a session, closing it and joining its subscription.
    ///
    /// Removing an unknown identifier is a no-op: a concurrent termination
    /// path may already have done it. Returns the removed session.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.take(session_id, |_| true)
    }

    /// Removes `session` only if it is still the registered record for its
    /// identifier. A killed session whose identifier was reused by a newer
    /// session leaves the newer one untouched.
    pub fn remove_session(&self, session: &Arc<Session>) -> bool {
        self.take(session.id(), |current| Arc::ptr_eq(current, session))
            .is_some()
    }

    fn take(
        &self,
        session_id: &str,
        matches: impl FnOnce(&Arc<Session>) -> bool,
    ) -> Option<Arc<Session>> {
        let removed = {
            let mut maps = self.maps();
            if !maps.by_id.get(session_id).is_some_and(matches) {
                return None;
            }
            let session = maps.by_id.remove(session_id)?;
            maps.by_conn.remove(&session.conn_id());
            session
        };
        removed.close();
        debug!(target: SESSION_TARGET, session = session_id, "session removed");
        Some(removed)
    }

    /// Snapshot of every live session in identifier order.
    #[must_use]
    pub fn list_all(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.maps().by_id.values().cloned().collect();
        sessions.sort_by(|left, right| left.id().cmp(right.id()));
        sessions
    }

    /// Removes and closes every session. Used at shutdown.
    pub fn drain_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = {
            let mut maps = self.maps();
            maps.by_conn.clear();
            maps.by_id.drain().map(|(_, session)| session).collect()
        };
        for session in &drained {
            session.close();
        }
        drained.len()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps().by_id.len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maps(&self) -> MutexGuard<'_, SessionMaps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
