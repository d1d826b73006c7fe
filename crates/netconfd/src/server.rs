//! A bootstrapped server and its running listener.

use std::sync::Arc;

use tracing::{info, warn};

use netconfd_config::{Config, ModuleConfigError, SocketEndpoint};

use crate::catalog::{ModuleCatalog, SyncSummary, load_manifest};
use crate::dispatch::SessionConnectionHandler;
use crate::state::ServerState;
use crate::telemetry::TelemetryHandle;
use crate::transport::{ListenerError, ListenerHandle, SocketListener};

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Result of a successful bootstrap: configuration, loaded modules and the
/// shared state connection loops run against.
#[derive(Debug)]
pub struct Server {
    config: Config,
    state: Arc<ServerState>,
    catalog: ModuleCatalog,
    telemetry: TelemetryHandle,
}

impl Server {
    pub(crate) const fn new(
        config: Config,
        state: Arc<ServerState>,
        catalog: ModuleCatalog,
        telemetry: TelemetryHandle,
    ) -> Self {
        Self {
            config,
            state,
            catalog,
            telemetry,
        }
    }

    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Shared registries and flags.
    #[must_use]
    pub const fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Re-reads the module manifest and applies it to the live registry.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleConfigError`] when the manifest cannot be read or
    /// parsed; the registry is left untouched in that case.
    pub fn reload_modules(&self) -> Result<SyncSummary, ModuleConfigError> {
        let manifest = load_manifest(&self.config)?;
        Ok(self.catalog.sync(self.state.modules(), &manifest))
    }

    /// Binds the configured socket and starts accepting agents.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the socket cannot be bound or the
    /// accept loop cannot start.
    pub fn listen(&self) -> Result<RunningServer, ListenerError> {
        let listener = SocketListener::bind(self.config.daemon_socket())?;
        let endpoint = listener.endpoint();
        let handler = Arc::new(SessionConnectionHandler::new(Arc::clone(&self.state)));
        let handle = listener.start(handler)?;
        info!(target: SERVER_TARGET, %endpoint, "accepting agent connections");
        Ok(RunningServer {
            endpoint,
            handle,
            state: Arc::clone(&self.state),
        })
    }
}

/// Accept loop and connection threads of a listening server.
#[derive(Debug)]
pub struct RunningServer {
    endpoint: SocketEndpoint,
    handle: ListenerHandle,
    state: Arc<ServerState>,
}

impl RunningServer {
    /// Endpoint agents connect to. For TCP port zero this carries the port
    /// the OS picked.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Stops accepting, tears down every connection and session, then
    /// closes the modules.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] when the accept loop panicked.
    /// Modules are closed regardless.
    pub fn shutdown(self) -> Result<(), ListenerError> {
        let Self { handle, state, .. } = self;
        state.shutdown().request();
        handle.shutdown();
        let connections = state.connections().shutdown_all();
        let sessions = state.sessions().drain_all();
        let joined = handle.join();
        if let Err(error) = &joined {
            warn!(target: SERVER_TARGET, %error, "accept loop ended abnormally");
        }
        let modules = state.modules().close_all();
        info!(
            target: SERVER_TARGET,
            connections, sessions, modules, "server stopped"
        );
        joined
    }
}
