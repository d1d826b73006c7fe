//! Structured health reporting for server lifecycle events.

use std::sync::Arc;

use netconfd_config::Config;
use netconfd_modules::{ModuleError, ModuleInfo};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked after a module was registered and initialised.
    fn module_loaded(&self, module: &ModuleInfo);

    /// Invoked when a manifest entry could not be loaded.
    fn module_failed(&self, name: &str, error: &ModuleError);

    /// Invoked after a module was unregistered and closed.
    fn module_removed(&self, name: &str);

    /// Invoked when an agent registers a session.
    fn session_opened(&self, session_id: &str, username: &str);

    /// Invoked once a session has been torn down.
    fn session_closed(&self, session_id: &str, reason: &str);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn module_loaded(&self, module: &ModuleInfo) {
        (**self).module_loaded(module);
    }

    fn module_failed(&self, name: &str, error: &ModuleError) {
        (**self).module_failed(name, error);
    }

    fn module_removed(&self, name: &str) {
        (**self).module_removed(name);
    }

    fn session_opened(&self, session_id: &str, username: &str) {
        (**self).session_opened(session_id, username);
    }

    fn session_closed(&self, session_id: &str, reason: &str) {
        (**self).session_closed(session_id, reason);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting server bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.daemon_socket(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            poll_interval_ms = config.poll_interval_ms,
            "server bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "server bootstrap failed"
        );
    }

    fn module_loaded(&self, module: &ModuleInfo) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "module_loaded",
            module = module.name(),
            handle = %module.handle(),
            allowed = module.descriptor().allowed(),
            "device module loaded"
        );
    }

    fn module_failed(&self, name: &str, error: &ModuleError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "module_failed",
            module = name,
            error = %error,
            "device module failed to load"
        );
    }

    fn module_removed(&self, name: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "module_removed",
            module = name,
            "device module removed"
        );
    }

    fn session_opened(&self, session_id: &str, username: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "session_opened",
            session = session_id,
            username,
            "session opened"
        );
    }

    fn session_closed(&self, session_id: &str, reason: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "session_closed",
            session = session_id,
            reason,
            "session closed"
        );
    }
}
