//! The contract every device module implements.
//!
//! The registry owns modules as `Box<dyn DeviceModule>` and serialises calls
//! into each one, so implementations need `Send` but not `Sync`.

use serde_json::Value;
use thiserror::Error;

use crate::capability::CapabilitySet;
use crate::descriptor::{ModuleHandle, RepositoryId};
use crate::notification::{Notification, NotificationBus};
use crate::reply::Reply;

/// JSON snapshot of a module's configuration or state.
pub type StateSnapshot = Value;

/// Failure reported by a module's initialiser or state callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ModuleFailure {
    message: String,
}

impl ModuleFailure {
    /// Wraps a failure description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// What a module learns about itself when it is initialised.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    handle: ModuleHandle,
    name: String,
    repository: Option<RepositoryId>,
    notifications: NotificationBus,
}

impl ModuleContext {
    /// Builds a context for a module being registered.
    #[must_use]
    pub const fn new(
        handle: ModuleHandle,
        name: String,
        repository: Option<RepositoryId>,
        notifications: NotificationBus,
    ) -> Self {
        Self {
            handle,
            name,
            repository,
            notifications,
        }
    }

    /// Handle assigned by the registry.
    #[must_use]
    pub const fn handle(&self) -> ModuleHandle {
        self.handle
    }

    /// Registered module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Repository the module owns.
    #[must_use]
    pub const fn repository(&self) -> Option<&RepositoryId> {
        self.repository.as_ref()
    }

    /// Bus the module publishes events on.
    #[must_use]
    pub const fn notifications(&self) -> &NotificationBus {
        &self.notifications
    }

    /// Publishes an event on the module's bus.
    pub fn publish(&self, event: &str, body: Value) -> usize {
        self.notifications.publish(Notification::new(event, body))
    }
}

/// The session on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    session_id: String,
    username: String,
    capabilities: CapabilitySet,
}

impl SessionContext {
    /// Describes a session.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        username: impl Into<String>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            username: username.into(),
            capabilities,
        }
    }

    /// Protocol session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Authenticated user name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Negotiated capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }
}

/// Behaviour of a pluggable device module.
///
/// # Example
///
/// ```
/// use netconfd_modules::{
///     DeviceModule, ModuleContext, ModuleFailure, Reply, SessionContext, StateSnapshot,
/// };
/// use serde_json::{json, Value};
///
/// struct Uptime;
///
/// impl DeviceModule for Uptime {
///     fn init(&mut self, _context: &ModuleContext) -> Result<StateSnapshot, ModuleFailure> {
///         Ok(Value::Null)
///     }
///
///     fn close(&mut self) {}
///
///     fn execute_operation(
///         &mut self,
///         _session: &SessionContext,
///         _operation: &str,
///         _payload: &Value,
///     ) -> Reply {
///         Reply::Ok
///     }
///
///     fn get_state_data(&self) -> Result<StateSnapshot, ModuleFailure> {
///         Ok(json!({"uptime": 42}))
///     }
/// }
/// ```
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
pub trait DeviceModule: Send {
    /// Prepares the module and returns its initial running configuration.
    ///
    /// # Errors
    ///
    /// A failure aborts the module's registration.
    fn init(&mut self, context: &ModuleContext) -> Result<StateSnapshot, ModuleFailure>;

    /// Releases module resources. Called exactly once on unregistration or
    /// server shutdown.
    fn close(&mut self);

    /// Executes `operation` for `session`.
    fn execute_operation(
        &mut self,
        session: &SessionContext,
        operation: &str,
        payload: &Value,
    ) -> Reply;

    /// Reports the module's operational state.
    ///
    /// # Errors
    ///
    /// Returns a failure when the state cannot be gathered.
    fn get_state_data(&self) -> Result<StateSnapshot, ModuleFailure>;
}
