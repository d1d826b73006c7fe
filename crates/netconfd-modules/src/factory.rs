//! Constructors for device module implementations.
//!
//! The module manifest names an implementation key per entry; the
//! [`ModuleFactory`] maps those keys to constructors so the daemon can build
//! a fresh instance at startup and on every reload.

use std::collections::BTreeMap;
use std::fmt;

use crate::contract::DeviceModule;
use crate::error::ModuleError;
use crate::system::SystemModule;

type Constructor = Box<dyn Fn() -> Box<dyn DeviceModule> + Send + Sync>;

/// Implementation key of the built-in [`SystemModule`].
pub const SYSTEM_IMPLEMENTATION: &str = "system";

/// Registry of module constructors keyed by implementation name.
#[derive(Default)]
pub struct ModuleFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl fmt::Debug for ModuleFactory {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ModuleFactory")
            .field("implementations", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleFactory {
    /// Creates a factory with no implementations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory knowing every built-in implementation.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.constructors.insert(
            SYSTEM_IMPLEMENTATION.to_owned(),
            Box::new(|| -> Box<dyn DeviceModule> { Box::new(SystemModule::default()) }),
        );
        factory
    }

    /// Registers a constructor under `implementation`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::DuplicateImplementation`] when the key is
    /// already taken.
    pub fn register<F>(&mut self, implementation: &str, constructor: F) -> Result<(), ModuleError>
    where
        F: Fn() -> Box<dyn DeviceModule> + Send + Sync + 'static,
    {
        if self.constructors.contains_key(implementation) {
            return Err(ModuleError::DuplicateImplementation {
                implementation: implementation.to_owned(),
            });
        }
        self.constructors
            .insert(implementation.to_owned(), Box::new(constructor));
        Ok(())
    }

    /// Builds a fresh module instance.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnknownImplementation`] for an unregistered
    /// key.
    pub fn instantiate(&self, implementation: &str) -> Result<Box<dyn DeviceModule>, ModuleError> {
        self.constructors
            .get(implementation)
            .map(|construct| construct())
            .ok_or_else(|| ModuleError::UnknownImplementation {
                implementation: implementation.to_owned(),
            })
    }

    /// Registered implementation keys in lexical order.
    pub fn implementations(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
