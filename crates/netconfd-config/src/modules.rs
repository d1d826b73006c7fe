//! Administrative device module manifest.
//!
//! The manifest is a YAML document listing the device modules the server
//! loads at startup and on reload:
//!
//! ```yaml
//! modules:
//!   - name: system
//!     capabilities:
//!       - urn:ietf:params:xml:ns:yang:ietf-system
//!     operations: [get, get-config, set-hostname]
//!     repository: ietf-system
//! ```

use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One device module entry of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Unique module name.
    pub name: String,
    /// Key of the built-in implementation to instantiate. Defaults to `name`.
    #[serde(default)]
    pub implementation: Option<String>,
    /// Capability URIs the module participates in.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Operation names the module executes.
    #[serde(default)]
    pub operations: Vec<String>,
    /// Whether the module receives requests.
    #[serde(default = "default_allowed")]
    pub allowed: bool,
    /// Identifier of the configuration repository the module owns.
    #[serde(default)]
    pub repository: Option<String>,
}

const fn default_allowed() -> bool {
    true
}

impl ModuleSpec {
    /// Builds an allowed entry with no repository.
    #[must_use]
    pub fn new(name: impl Into<String>, capabilities: Vec<String>, operations: Vec<String>) -> Self {
        Self {
            name: name.into(),
            implementation: None,
            capabilities,
            operations,
            allowed: true,
            repository: None,
        }
    }

    /// Implementation key used to look up the module factory.
    #[must_use]
    pub fn implementation(&self) -> &str {
        self.implementation.as_deref().unwrap_or(self.name.as_str())
    }

    fn validate(&self) -> Result<(), ModuleConfigError> {
        if self.name.trim().is_empty() {
            return Err(ModuleConfigError::invalid("module name must not be empty"));
        }
        if let Some(blank) = self
            .capabilities
            .iter()
            .chain(self.operations.iter())
            .find(|entry| entry.trim().is_empty())
        {
            return Err(ModuleConfigError::invalid(format!(
                "module '{}' declares a blank capability or operation '{blank}'",
                self.name
            )));
        }
        if self
            .repository
            .as_deref()
            .is_some_and(|repository| repository.trim().is_empty())
        {
            return Err(ModuleConfigError::invalid(format!(
                "module '{}' declares an empty repository",
                self.name
            )));
        }
        Ok(())
    }
}

/// Parsed and validated module manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Entries in load order.
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

impl ModuleManifest {
    /// Parses a manifest from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleConfigError::Parse`] for malformed YAML and
    /// [`ModuleConfigError::Invalid`] when an entry fails validation or two
    /// entries share a name or repository.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ModuleConfigError> {
        let manifest: Self = serde_saphyr::from_str(contents).map_err(|error| {
            ModuleConfigError::Parse {
                message: error.to_string(),
            }
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reads and parses a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleConfigError::Read`] when the file cannot be read, or
    /// any error reported by [`ModuleManifest::from_yaml_str`].
    pub fn load(path: &Utf8Path) -> Result<Self, ModuleConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ModuleConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Looks up an entry by module name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|spec| spec.name == name)
    }

    fn validate(&self) -> Result<(), ModuleConfigError> {
        let mut names = HashSet::new();
        let mut repositories = HashSet::new();
        for spec in &self.modules {
            spec.validate()?;
            if !names.insert(spec.name.as_str()) {
                return Err(ModuleConfigError::invalid(format!(
                    "module '{}' is listed more than once",
                    spec.name
                )));
            }
            if let Some(repository) = spec.repository.as_deref()
                && !repositories.insert(repository)
            {
                return Err(ModuleConfigError::invalid(format!(
                    "repository '{repository}' is claimed by more than one module"
                )));
            }
        }
        Ok(())
    }
}

/// Errors raised while loading the module manifest.
#[derive(Debug, Error)]
pub enum ModuleConfigError {
    /// The manifest file could not be read.
    #[error("failed to read module manifest '{path}': {source}")]
    Read {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The manifest is not valid YAML for the expected schema.
    #[error("failed to parse module manifest: {message}")]
    Parse {
        /// Parser diagnostic.
        message: String,
    },
    /// The manifest parsed but is semantically invalid.
    #[error("invalid module manifest: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },
}

impl ModuleConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}
