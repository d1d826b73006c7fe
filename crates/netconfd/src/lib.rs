//! The `netconfd` management-protocol server.
//!
//! Front-end agents, one per client session, connect to the server over a
//! local socket and speak JSON lines. The server keeps a registry of live
//! sessions and a registry of device modules, and routes every operation to
//! the modules whose capabilities the session negotiated:
//!
//! - [`sessions`] tracks sessions by identifier and by carrying connection.
//! - [`matcher`] selects the modules eligible for a request.
//! - [`dispatch`] classifies requests, handles session lifecycle and
//!   notification subscriptions, and fans device operations out to modules.
//! - [`transport`] accepts connections and lets the dispatcher close them.
//!
//! [`run_daemon`] wires everything together: configuration, telemetry, the
//! module manifest, the listener and the signal supervisor. Lower-level
//! entry points such as [`bootstrap_with`] and [`Server`] exist for
//! embedding and testing.

pub mod agent;
mod bootstrap;
mod catalog;
pub mod dispatch;
mod health;
pub mod matcher;
mod process;
mod server;
pub mod sessions;
mod state;
mod telemetry;
pub mod transport;

pub use agent::{AgentClient, AgentError};
pub use bootstrap::{
    BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use catalog::{
    ModuleCatalog, SYSTEM_REPOSITORY, SyncSummary, default_manifest, descriptor_for,
    load_manifest,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    FORCED_EXIT_STATUS, LaunchError, ShutdownError, ShutdownFlag, ShutdownSignal, SignalAction,
    SignalState, SystemShutdownSignal, run_daemon,
};
pub use server::{RunningServer, Server};
pub use state::ServerState;
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
