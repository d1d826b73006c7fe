//! Server bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use netconfd_config::{Config, ModuleConfigError, SocketPreparationError};
use netconfd_modules::{ModuleFactory, ModuleRegistry};

use crate::catalog::{ModuleCatalog, load_manifest};
use crate::health::HealthReporter;
use crate::server::Server;
use crate::state::ServerState;
use crate::telemetry::{self, TelemetryError};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    ///
    /// # Errors
    ///
    /// Returns the layered loader's error when a source cannot be parsed.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare server socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// The module manifest could not be read.
    #[error("failed to load module manifest: {source}")]
    Modules {
        /// Manifest read or parse error.
        #[source]
        source: ModuleConfigError,
    },
}

/// Bootstraps the server using the supplied collaborators.
///
/// Stages run in order: configuration, telemetry, socket directory, module
/// manifest. The first failing stage is reported through `reporter` and
/// returned. Individual modules that fail to load do not fail the
/// bootstrap; they are reported and skipped.
///
/// # Errors
///
/// Returns the [`BootstrapError`] of the first failing stage.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    factory: ModuleFactory,
) -> Result<Server, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => return Err(fail(&*reporter, BootstrapError::Configuration { source })),
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => return Err(fail(&*reporter, BootstrapError::Telemetry { source })),
    };

    if let Err(source) = config.daemon_socket().prepare_filesystem() {
        return Err(fail(&*reporter, BootstrapError::Socket { source }));
    }

    let manifest = match load_manifest(&config) {
        Ok(manifest) => manifest,
        Err(source) => return Err(fail(&*reporter, BootstrapError::Modules { source })),
    };

    let modules = Arc::new(ModuleRegistry::default());
    let catalog = ModuleCatalog::new(factory, Arc::clone(&reporter));
    catalog.sync(&modules, &manifest);

    let state = Arc::new(ServerState::new(
        modules,
        config.poll_interval(),
        Arc::clone(&reporter),
    ));
    reporter.bootstrap_succeeded(&config);

    Ok(Server::new(config, state, catalog, telemetry))
}

fn fail(reporter: &dyn HealthReporter, error: BootstrapError) -> BootstrapError {
    reporter.bootstrap_failed(&error);
    error
}
