//! Reconciles the module registry with the administrative manifest.
//!
//! At startup and on every reload the manifest is the desired state. Entries
//! absent from the registry are instantiated through the [`ModuleFactory`]
//! and added in manifest order, registered modules missing from the manifest
//! are removed and closed, and modules whose entry changed only in its
//! `allowed` flag are toggled in place. Any other change replaces the module
//! with a fresh instance.

use std::sync::Arc;

use tracing::{debug, info};

use netconfd_config::{Config, ModuleConfigError, ModuleManifest, ModuleSpec};
use netconfd_modules::{
    ModuleDescriptor, ModuleError, ModuleFactory, ModuleHandle, ModuleRegistry,
    SYSTEM_CAPABILITY, SYSTEM_IMPLEMENTATION, SYSTEM_OPERATIONS,
};

use crate::health::HealthReporter;

const CATALOG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::catalog");

/// Repository owned by the built-in system module.
pub const SYSTEM_REPOSITORY: &str = "ietf-system";

/// Outcome of one reconciliation pass, by module name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Newly registered modules.
    pub added: Vec<String>,
    /// Modules removed because the manifest no longer lists them.
    pub removed: Vec<String>,
    /// Modules replaced or toggled because their entry changed.
    pub updated: Vec<String>,
    /// Entries that could not be instantiated or registered.
    pub failed: Vec<String>,
}

impl SyncSummary {
    /// Whether the pass changed nothing and reported no failure.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.updated.is_empty()
            && self.failed.is_empty()
    }
}

/// Builds device modules from manifest entries and keeps the registry in
/// step with the manifest.
pub struct ModuleCatalog {
    factory: ModuleFactory,
    reporter: Arc<dyn HealthReporter>,
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ModuleCatalog")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

impl ModuleCatalog {
    /// Creates a catalog instantiating modules through `factory`.
    #[must_use]
    pub fn new(factory: ModuleFactory, reporter: Arc<dyn HealthReporter>) -> Self {
        Self { factory, reporter }
    }

    /// Applies `manifest` to `registry`.
    ///
    /// Removals run before any addition, so a module taking over a
    /// repository released by another entry in the same pass can register.
    /// Failures are per entry: a module that cannot be built or
    /// initialised is reported and listed in [`SyncSummary::failed`] while
    /// the remaining entries are still applied.
    pub fn sync(&self, registry: &ModuleRegistry, manifest: &ModuleManifest) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let mut replaced = Vec::new();

        for info in registry.list() {
            let Some(spec) = manifest.get(info.name()) else {
                if self.remove(registry, info.handle(), info.name(), &mut summary.failed) {
                    summary.removed.push(info.name().to_owned());
                }
                continue;
            };
            let desired = descriptor_for(spec);
            let current = info.descriptor().clone().with_allowed(desired.allowed());
            if current != desired {
                if self.remove(registry, info.handle(), info.name(), &mut summary.failed) {
                    replaced.push(spec.name.clone());
                }
            } else if info.descriptor().allowed() != desired.allowed() {
                match registry.set_allowed(info.name(), desired.allowed()) {
                    Ok(()) => summary.updated.push(spec.name.clone()),
                    Err(error) => {
                        self.reporter.module_failed(info.name(), &error);
                        summary.failed.push(spec.name.clone());
                    }
                }
            }
        }

        for spec in &manifest.modules {
            if registry.get_by_name(&spec.name).is_ok() {
                continue;
            }
            let outcome = if !self.load(registry, spec) {
                &mut summary.failed
            } else if replaced.contains(&spec.name) {
                &mut summary.updated
            } else {
                &mut summary.added
            };
            outcome.push(spec.name.clone());
        }

        info!(
            target: CATALOG_TARGET,
            added = summary.added.len(),
            removed = summary.removed.len(),
            updated = summary.updated.len(),
            failed = summary.failed.len(),
            "module manifest applied"
        );
        summary
    }

    fn load(&self, registry: &ModuleRegistry, spec: &ModuleSpec) -> bool {
        let added = self
            .factory
            .instantiate(spec.implementation())
            .and_then(|module| registry.add(descriptor_for(spec), module))
            .and_then(|handle| registry.get_by_handle(handle));
        match added {
            Ok(info) => {
                self.reporter.module_loaded(&info);
                true
            }
            Err(error) => {
                self.reporter.module_failed(&spec.name, &error);
                false
            }
        }
    }

    fn remove(
        &self,
        registry: &ModuleRegistry,
        handle: ModuleHandle,
        name: &str,
        failed: &mut Vec<String>,
    ) -> bool {
        match registry.remove(handle) {
            Ok(()) => {
                self.reporter.module_removed(name);
                true
            }
            // Already gone: a concurrent reload got there first.
            Err(ModuleError::NotFound { .. }) => {
                debug!(target: CATALOG_TARGET, module = name, "module already removed");
                true
            }
            Err(error) => {
                self.reporter.module_failed(name, &error);
                failed.push(name.to_owned());
                false
            }
        }
    }
}

/// Registry descriptor for a manifest entry.
#[must_use]
pub fn descriptor_for(spec: &ModuleSpec) -> ModuleDescriptor {
    let descriptor = ModuleDescriptor::new(
        spec.name.clone(),
        spec.capabilities.iter().map(String::as_str).collect(),
        spec.operations.iter().cloned(),
    )
    .with_allowed(spec.allowed);
    match &spec.repository {
        Some(repository) => descriptor.with_repository(repository.clone()),
        None => descriptor,
    }
}

/// Manifest used when no `modules_file` is configured: the built-in system
/// module alone.
#[must_use]
pub fn default_manifest() -> ModuleManifest {
    let mut system = ModuleSpec::new(
        SYSTEM_IMPLEMENTATION,
        vec![SYSTEM_CAPABILITY.to_owned()],
        SYSTEM_OPERATIONS.iter().map(|&operation| operation.to_owned()).collect(),
    );
    system.repository = Some(SYSTEM_REPOSITORY.to_owned());
    ModuleManifest {
        modules: vec![system],
    }
}

/// Loads the manifest named by the configuration, or the default one.
///
/// # Errors
///
/// Returns [`ModuleConfigError`] when the configured file cannot be read or
/// parsed.
pub fn load_manifest(config: &Config) -> Result<ModuleManifest, ModuleConfigError> {
    config
        .modules_file()
        .map_or_else(|| Ok(default_manifest()), ModuleManifest::load)
}
