//! Supervises server launch sequencing and runtime orchestration.

use std::sync::Arc;

use tracing::{info, warn};

use netconfd_modules::ModuleFactory;

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::server::Server;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Service dependencies required to construct the server runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) factory: ModuleFactory,
}

/// Collaborators required to launch the server runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) services: ServiceDeps<L>,
    pub(crate) shutdown: S,
}

/// Runs the server using the production collaborators until a termination
/// signal arrives.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap, the listener or the signal
/// handlers fail.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
            factory: ModuleFactory::with_builtins(),
        },
        shutdown: SystemShutdownSignal::new(),
    };
    run_daemon_with(plan)
}

/// Runs the server with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan { services, shutdown } = plan;
    let ServiceDeps {
        loader,
        reporter,
        factory,
    } = services;

    info!(target: PROCESS_TARGET, "starting server runtime");
    let server = bootstrap_with(&loader, reporter, factory)?;
    let running = server.listen()?;
    info!(
        target: PROCESS_TARGET,
        endpoint = %running.endpoint(),
        "server ready"
    );

    let waited = shutdown.wait(&mut || reload(&server));
    let stopped = running.shutdown();
    waited?;
    stopped?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

fn reload(server: &Server) {
    match server.reload_modules() {
        Ok(summary) => info!(
            target: PROCESS_TARGET,
            added = ?summary.added,
            removed = ?summary.removed,
            updated = ?summary.updated,
            failed = ?summary.failed,
            "module manifest reloaded"
        ),
        Err(error) => warn!(
            target: PROCESS_TARGET,
            %error,
            "module manifest reload failed; keeping current modules"
        ),
    }
}
