//! State shared by the accept loop, connection loops and the supervisor.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use netconfd_modules::ModuleRegistry;

use crate::dispatch::Dispatcher;
use crate::health::HealthReporter;
use crate::process::ShutdownFlag;
use crate::sessions::SessionRegistry;
use crate::transport::{ConnectionTable, SessionTransport};

/// Registries, connection table and flags of a running server.
pub struct ServerState {
    sessions: Arc<SessionRegistry>,
    modules: Arc<ModuleRegistry>,
    connections: Arc<ConnectionTable>,
    shutdown: ShutdownFlag,
    poll_interval: Duration,
    reporter: Arc<dyn HealthReporter>,
}

impl fmt::Debug for ServerState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServerState")
            .field("sessions", &self.sessions)
            .field("modules", &self.modules)
            .field("connections", &self.connections)
            .field("shutdown", &self.shutdown.is_requested())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ServerState {
    /// Builds state around an already populated module registry.
    #[must_use]
    pub fn new(
        modules: Arc<ModuleRegistry>,
        poll_interval: Duration,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::new()),
            modules,
            connections: Arc::new(ConnectionTable::new()),
            shutdown: ShutdownFlag::new(),
            poll_interval,
            reporter,
        }
    }

    /// Live sessions.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Loaded device modules.
    #[must_use]
    pub const fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    /// Open agent connections.
    #[must_use]
    pub const fn connections(&self) -> &Arc<ConnectionTable> {
        &self.connections
    }

    /// Cooperative shutdown flag.
    #[must_use]
    pub const fn shutdown(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    /// Upper bound on how long a loop blocks before re-checking its flags.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Lifecycle event sink.
    #[must_use]
    pub fn reporter(&self) -> &dyn HealthReporter {
        self.reporter.as_ref()
    }

    /// Dispatcher wired to these registries, with the connection table as
    /// transport.
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        let transport: Arc<dyn SessionTransport> = self.connections.clone();
        Dispatcher::new(
            Arc::clone(&self.sessions),
            Arc::clone(&self.modules),
            transport,
            self.poll_interval,
        )
    }
}
