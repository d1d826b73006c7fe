//! Registry of loaded device modules.
//!
//! The [`ModuleRegistry`] is shared by every connection thread. It keeps
//! modules in registration order, which is also the order in which matching
//! modules are consulted for an operation. Each module sits behind its own
//! mutex so calls into one module are serialised while different modules run
//! concurrently.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use crate::capability::CapabilitySet;
use crate::contract::{DeviceModule, ModuleContext, SessionContext, StateSnapshot};
use crate::descriptor::{ModuleDescriptor, ModuleHandle};
use crate::error::ModuleError;
use crate::notification::NotificationBus;
use crate::reply::{Reply, RpcError};

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

type SharedModule = Arc<Mutex<Box<dyn DeviceModule>>>;

/// Snapshot of a registered module's description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    handle: ModuleHandle,
    descriptor: ModuleDescriptor,
}

impl ModuleInfo {
    /// Registry handle.
    #[must_use]
    pub const fn handle(&self) -> ModuleHandle {
        self.handle
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Full descriptor as of the snapshot.
    #[must_use]
    pub const fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }
}

/// Callable reference to a registered module.
///
/// Holding a reference keeps the module alive even if it is unregistered
/// concurrently; calls made after [`DeviceModule::close`] are the module's
/// own concern.
#[derive(Clone)]
pub struct ModuleRef {
    info: ModuleInfo,
    module: SharedModule,
}

impl fmt::Debug for ModuleRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ModuleRef")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl ModuleRef {
    /// Description of the referenced module.
    #[must_use]
    pub const fn info(&self) -> &ModuleInfo {
        &self.info
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.info.name()
    }

    /// Runs `operation` on the module.
    ///
    /// A panic inside the module is contained here and answered with an
    /// `operation-failed` reply. The module's lock is poisoned by it, so
    /// later calls are refused the same way instead of reaching the module
    /// again.
    #[must_use]
    pub fn execute(&self, session: &SessionContext, operation: &str, payload: &Value) -> Reply {
        let Ok(mut module) = self.module.lock() else {
            warn!(
                target: REGISTRY_TARGET,
                module = self.name(),
                operation,
                "skipping module poisoned by an earlier panic"
            );
            return Reply::error(RpcError::operation_failed(self.unavailable().to_string()));
        };
        // The guard moves into the closure so an unwinding call poisons it.
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
            module.execute_operation(session, operation, payload)
        }));
        outcome.unwrap_or_else(|_| {
            warn!(
                target: REGISTRY_TARGET,
                module = self.name(),
                operation,
                "module panicked while executing an operation"
            );
            Reply::error(RpcError::operation_failed(self.unavailable().to_string()))
        })
    }

    /// Collects the module's state data.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::StateData`] when the module reports a failure
    /// and [`ModuleError::Unavailable`] when it panics, now or earlier.
    pub fn state_data(&self) -> Result<StateSnapshot, ModuleError> {
        let module = self.module.lock().map_err(|_| self.unavailable())?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || module.get_state_data()));
        match outcome {
            Ok(snapshot) => snapshot.map_err(|failure| ModuleError::StateData {
                name: self.name().to_owned(),
                message: failure.message().to_owned(),
            }),
            Err(_) => {
                warn!(
                    target: REGISTRY_TARGET,
                    module = self.name(),
                    "module panicked while reporting state data"
                );
                Err(self.unavailable())
            }
        }
    }

    fn unavailable(&self) -> ModuleError {
        ModuleError::Unavailable {
            name: self.name().to_owned(),
        }
    }
}

struct ModuleEntry {
    handle: ModuleHandle,
    descriptor: ModuleDescriptor,
    module: SharedModule,
}

impl ModuleEntry {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            handle: self.handle,
            descriptor: self.descriptor.clone(),
        }
    }

    fn reference(&self) -> ModuleRef {
        ModuleRef {
            info: self.info(),
            module: Arc::clone(&self.module),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<ModuleEntry>,
    next_handle: u32,
}

/// Thread-safe registry of device modules.
///
/// # Example
///
/// ```
/// use netconfd_modules::{CapabilitySet, ModuleDescriptor, ModuleRegistry, SystemModule};
///
/// let registry = ModuleRegistry::default();
/// let descriptor = ModuleDescriptor::new(
///     "system",
///     ["urn:ietf:params:xml:ns:yang:ietf-system"].into_iter().collect::<CapabilitySet>(),
///     ["get"],
/// );
/// let handle = registry
///     .add(descriptor, Box::new(SystemModule::default()))
///     .expect("registration succeeds");
/// assert_eq!(registry.get_by_name("system").expect("lookup").handle(), handle);
/// ```
pub struct ModuleRegistry {
    state: Mutex<RegistryState>,
    notifications: NotificationBus,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(NotificationBus::default())
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ModuleRegistry")
            .field("modules", &self.len())
            .finish_non_exhaustive()
    }
}

impl ModuleRegistry {
    /// Creates an empty registry whose modules publish on `notifications`.
    #[must_use]
    pub fn new(notifications: NotificationBus) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            notifications,
        }
    }

    /// Bus handed to every module at initialisation.
    #[must_use]
    pub const fn notifications(&self) -> &NotificationBus {
        &self.notifications
    }

    // Entries are only pushed after a successful initialiser, so state
    // behind a poisoned lock is still consistent.
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers and initialises a module.
    ///
    /// The initialiser runs while the registry is locked, so a name or
    /// repository cannot be claimed twice by concurrent registrations.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Descriptor`] for an invalid descriptor,
    /// [`ModuleError::DuplicateModule`] when the name is taken,
    /// [`ModuleError::RepositoryInUse`] when the repository is owned by
    /// another module, and [`ModuleError::InitFailed`] when the initialiser
    /// fails. Nothing is registered in any of these cases.
    pub fn add(
        &self,
        descriptor: ModuleDescriptor,
        mut module: Box<dyn DeviceModule>,
    ) -> Result<ModuleHandle, ModuleError> {
        descriptor.validate()?;
        let mut state = self.state();
        if state
            .entries
            .iter()
            .any(|entry| entry.descriptor.name() == descriptor.name())
        {
            return Err(ModuleError::DuplicateModule {
                name: descriptor.name().to_owned(),
            });
        }
        if let Some(repository) = descriptor.repository()
            && let Some(owner) = state
                .entries
                .iter()
                .find(|entry| entry.descriptor.repository() == Some(repository))
        {
            return Err(ModuleError::RepositoryInUse {
                repository: repository.clone(),
                owner: owner.descriptor.name().to_owned(),
            });
        }

        let handle = ModuleHandle::new(state.next_handle);
        state.next_handle = state
            .next_handle
            .checked_add(1)
            .ok_or(ModuleError::HandlesExhausted)?;

        let context = ModuleContext::new(
            handle,
            descriptor.name().to_owned(),
            descriptor.repository().cloned(),
            self.notifications.clone(),
        );
        let running = module
            .init(&context)
            .map_err(|failure| ModuleError::InitFailed {
                name: descriptor.name().to_owned(),
                message: failure.message().to_owned(),
            })?;

        debug!(
            target: REGISTRY_TARGET,
            module = descriptor.name(),
            %handle,
            running_config = %running,
            "module registered"
        );
        state.entries.push(ModuleEntry {
            handle,
            descriptor,
            module: Arc::new(Mutex::new(module)),
        });
        Ok(handle)
    }

    /// Unregisters a module and closes it.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotFound`] for an unknown handle.
    pub fn remove(&self, handle: ModuleHandle) -> Result<(), ModuleError> {
        let entry = {
            let mut state = self.state();
            let position = state
                .entries
                .iter()
                .position(|entry| entry.handle == handle)
                .ok_or_else(|| ModuleError::handle_not_found(handle))?;
            state.entries.remove(position)
        };
        close_entry(&entry);
        Ok(())
    }

    /// Enables or disables request delivery to a module.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotFound`] for an unknown name.
    pub fn set_allowed(&self, name: &str, allowed: bool) -> Result<(), ModuleError> {
        let mut state = self.state();
        let entry = state
            .entries
            .iter_mut()
            .find(|entry| entry.descriptor.name() == name)
            .ok_or_else(|| ModuleError::name_not_found(name))?;
        entry.descriptor.set_allowed(allowed);
        debug!(target: REGISTRY_TARGET, module = name, allowed, "module permission changed");
        Ok(())
    }

    /// Looks up a module by handle.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotFound`] for an unknown handle.
    pub fn get_by_handle(&self, handle: ModuleHandle) -> Result<ModuleInfo, ModuleError> {
        self.find(|entry| entry.handle == handle)
            .map(|module| module.info)
            .ok_or_else(|| ModuleError::handle_not_found(handle))
    }

    /// Looks up a module by name.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotFound`] for an unknown name.
    pub fn get_by_name(&self, name: &str) -> Result<ModuleInfo, ModuleError> {
        self.find(|entry| entry.descriptor.name() == name)
            .map(|module| module.info)
            .ok_or_else(|| ModuleError::name_not_found(name))
    }

    /// Looks up the module owning `repository`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotFound`] when no module owns it.
    pub fn get_by_repository(&self, repository: &str) -> Result<ModuleInfo, ModuleError> {
        self.find(|entry| {
            entry
                .descriptor
                .repository()
                .is_some_and(|owned| owned.as_str() == repository)
        })
        .map(|module| module.info)
        .ok_or_else(|| ModuleError::repository_not_found(repository))
    }

    /// Returns a callable reference to a module.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotFound`] for an unknown handle.
    pub fn module(&self, handle: ModuleHandle) -> Result<ModuleRef, ModuleError> {
        self.find(|entry| entry.handle == handle)
            .ok_or_else(|| ModuleError::handle_not_found(handle))
    }

    fn find(&self, predicate: impl Fn(&ModuleEntry) -> bool) -> Option<ModuleRef> {
        self.state()
            .entries
            .iter()
            .find(|entry| predicate(entry))
            .map(ModuleEntry::reference)
    }

    /// Modules eligible to run `operation` for a session holding
    /// `capabilities`, in registration order.
    ///
    /// A module is eligible when it is allowed, implements the operation,
    /// and shares at least one capability with the session.
    #[must_use]
    pub fn matching(&self, operation: &str, capabilities: &CapabilitySet) -> Vec<ModuleRef> {
        self.state()
            .entries
            .iter()
            .filter(|entry| {
                entry.descriptor.allowed()
                    && entry.descriptor.implements(operation)
                    && entry.descriptor.capabilities().intersects(capabilities)
            })
            .map(ModuleEntry::reference)
            .collect()
    }

    /// Snapshots of every module in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<ModuleInfo> {
        self.state().entries.iter().map(ModuleEntry::info).collect()
    }

    /// Union of the capabilities of allowed modules.
    #[must_use]
    pub fn capabilities(&self) -> CapabilitySet {
        let mut union = CapabilitySet::new();
        for entry in &self.state().entries {
            if entry.descriptor.allowed() {
                union.extend_from(entry.descriptor.capabilities());
            }
        }
        union
    }

    /// State data of a single module.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NotFound`] for an unknown handle or the error
    /// reported by [`ModuleRef::state_data`].
    pub fn state_data(&self, handle: ModuleHandle) -> Result<StateSnapshot, ModuleError> {
        self.module(handle)?.state_data()
    }

    /// Unregisters every module, closing them in reverse registration
    /// order. Returns the number of modules closed.
    pub fn close_all(&self) -> usize {
        let entries = std::mem::take(&mut self.state().entries);
        let count = entries.len();
        for entry in entries.iter().rev() {
            close_entry(entry);
        }
        count
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Returns `true` when no modules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }
}

fn close_entry(entry: &ModuleEntry) {
    let mut module = entry
        .module
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    module.close();
    debug!(
        target: REGISTRY_TARGET,
        module = entry.descriptor.name(),
        handle = %entry.handle,
        "module closed"
    );
}
