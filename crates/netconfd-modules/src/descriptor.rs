//! Static description of a device module.
//!
//! A [`ModuleDescriptor`] is what the registry knows about a module besides
//! its behaviour: the name it is addressed by, the capabilities it
//! participates in, the operations it executes, the configuration repository
//! it owns, and whether it currently receives requests.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;
use crate::error::ModuleError;

/// Stable handle assigned by the registry at registration. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleHandle(u32);

impl ModuleHandle {
    /// Wraps a raw handle value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw handle value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModuleHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Identifier of a configuration repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(String);

impl RepositoryId {
    /// Wraps a repository identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Registration-time description of a device module.
///
/// # Example
///
/// ```
/// use netconfd_modules::{CapabilitySet, ModuleDescriptor};
///
/// let descriptor = ModuleDescriptor::new(
///     "system",
///     ["urn:ietf:params:xml:ns:yang:ietf-system"].into_iter().collect::<CapabilitySet>(),
///     ["get", "set-hostname"],
/// )
/// .with_repository("ietf-system");
/// assert!(descriptor.implements("get"));
/// assert!(descriptor.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    name: String,
    capabilities: CapabilitySet,
    operations: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repository: Option<RepositoryId>,
    allowed: bool,
}

impl ModuleDescriptor {
    /// Describes an allowed module without a repository.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, capabilities: CapabilitySet, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            capabilities,
            operations: operations.into_iter().map(Into::into).collect(),
            repository: None,
            allowed: true,
        }
    }

    /// Sets the owned repository.
    #[must_use]
    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(RepositoryId::new(repository));
        self
    }

    /// Sets the initial allowed flag.
    #[must_use]
    pub const fn with_allowed(mut self, allowed: bool) -> Self {
        self.allowed = allowed;
        self
    }

    /// Checks structural constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Descriptor`] when the name is blank, an
    /// operation is blank, or the repository identifier is empty.
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.name.trim().is_empty() {
            return Err(ModuleError::descriptor("module name must not be empty"));
        }
        if self.operations.iter().any(|op| op.trim().is_empty()) {
            return Err(ModuleError::descriptor(format!(
                "module '{}' declares a blank operation",
                self.name
            )));
        }
        if self
            .repository
            .as_ref()
            .is_some_and(|repository| repository.as_str().trim().is_empty())
        {
            return Err(ModuleError::descriptor(format!(
                "module '{}' declares an empty repository",
                self.name
            )));
        }
        Ok(())
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Implemented operations in lexical order.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(String::as_str)
    }

    /// Returns `true` when the module executes `operation`.
    #[must_use]
    pub fn implements(&self, operation: &str) -> bool {
        self.operations.contains(operation)
    }

    /// Owned repository.
    #[must_use]
    pub const fn repository(&self) -> Option<&RepositoryId> {
        self.repository.as_ref()
    }

    /// Whether the module receives requests.
    #[must_use]
    pub const fn allowed(&self) -> bool {
        self.allowed
    }

    pub(crate) const fn set_allowed(&mut self, allowed: bool) {
        self.allowed = allowed;
    }
}
