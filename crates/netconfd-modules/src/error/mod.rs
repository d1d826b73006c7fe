//! Domain errors raised by device module management.
//!
//! Registry and factory operations report failures through [`ModuleError`].
//! Failures raised by a module's own initialiser or state callback arrive as
//! [`ModuleFailure`](crate::ModuleFailure) and are wrapped with the module
//! name here.

use thiserror::Error;

use crate::descriptor::{ModuleHandle, RepositoryId};

/// Errors arising from module registration, lookup and instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    /// No registered module matches the lookup key.
    #[error("module {key} not found in registry")]
    NotFound {
        /// Description of the lookup key.
        key: String,
    },

    /// A module with the same name is already registered.
    #[error("module '{name}' is already registered")]
    DuplicateModule {
        /// Conflicting module name.
        name: String,
    },

    /// Another module already owns the repository.
    #[error("repository '{repository}' is already owned by module '{owner}'")]
    RepositoryInUse {
        /// Contested repository.
        repository: RepositoryId,
        /// Name of the current owner.
        owner: String,
    },

    /// The module's initialiser reported a failure.
    #[error("module '{name}' failed to initialise: {message}")]
    InitFailed {
        /// Module name.
        name: String,
        /// Failure reported by the module.
        message: String,
    },

    /// The module could not produce its state data.
    #[error("module '{name}' failed to report state data: {message}")]
    StateData {
        /// Module name.
        name: String,
        /// Failure reported by the module.
        message: String,
    },

    /// The module panicked earlier and can no longer be called.
    #[error("module '{name}' is unavailable after a panic")]
    Unavailable {
        /// Module name.
        name: String,
    },

    /// No implementation is registered under the requested key.
    #[error("no module implementation named '{implementation}'")]
    UnknownImplementation {
        /// Requested implementation key.
        implementation: String,
    },

    /// An implementation key was registered twice with the factory.
    #[error("module implementation '{implementation}' is already registered")]
    DuplicateImplementation {
        /// Conflicting implementation key.
        implementation: String,
    },

    /// A descriptor failed validation.
    #[error("invalid module descriptor: {message}")]
    Descriptor {
        /// Description of the validation failure.
        message: String,
    },

    /// The registry has handed out every available handle.
    #[error("module handles exhausted")]
    HandlesExhausted,
}

impl ModuleError {
    pub(crate) fn descriptor(message: impl Into<String>) -> Self {
        Self::Descriptor {
            message: message.into(),
        }
    }

    pub(crate) fn handle_not_found(handle: ModuleHandle) -> Self {
        Self::NotFound {
            key: format!("with handle {handle}"),
        }
    }

    pub(crate) fn name_not_found(name: &str) -> Self {
        Self::NotFound {
            key: format!("'{name}'"),
        }
    }

    pub(crate) fn repository_not_found(repository: &str) -> Self {
        Self::NotFound {
            key: format!("owning repository '{repository}'"),
        }
    }
}

#[cfg(test)]
mod tests;
