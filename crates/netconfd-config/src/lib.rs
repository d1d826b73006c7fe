//! Shared configuration for the netconfd server and its front-end agents.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then a
//! configuration file, then `NETCONFD_*` environment variables, then command
//! line flags. The resolved [`Config`] tells the daemon where to listen for
//! agent connections, how to log, how often connection loops wake up to
//! observe shutdown requests, and where the administrative module manifest
//! lives.

mod defaults;
mod logging;
mod modules;
mod socket;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TCP_PORT, default_log_filter,
    default_log_filter_string, default_log_format, default_poll_interval_ms,
    default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use modules::{ModuleConfigError, ModuleManifest, ModuleSpec};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "NETCONFD")]
pub struct Config {
    /// Socket the server listens on for agent connections.
    #[ortho_config(default = defaults::default_socket_endpoint())]
    pub daemon_socket: SocketEndpoint,
    /// `tracing` filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the log stream.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Upper bound, in milliseconds, on how long a connection loop blocks
    /// before re-checking for shutdown.
    #[ortho_config(default = defaults::DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,
    /// Path to the YAML device module manifest.
    #[serde(default)]
    pub modules_file: Option<Utf8PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: defaults::default_socket_endpoint(),
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
            poll_interval_ms: defaults::DEFAULT_POLL_INTERVAL_MS,
            modules_file: None,
        }
    }
}

impl Config {
    /// Socket endpoint agents connect to.
    #[must_use]
    pub const fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Poll interval of the per-connection readiness loop.
    ///
    /// A zero value is clamped to one millisecond so loops never spin.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Location of the module manifest, when one is configured.
    #[must_use]
    pub fn modules_file(&self) -> Option<&camino::Utf8Path> {
        self.modules_file.as_deref()
    }
}
