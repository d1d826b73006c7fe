//! Test configuration loaders for scenarios covering success and failure
//! paths.

use std::ffi::OsString;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use netconfd_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader that provisions its socket and manifest under a temporary
/// directory.
pub struct TestConfigLoader {
    dir: TempDir,
    endpoint: SocketEndpoint,
    modules_file: Option<Utf8PathBuf>,
}

impl TestConfigLoader {
    /// Unix socket inside the temporary directory.
    #[must_use]
    pub fn unix() -> Self {
        let dir = TempDir::new().expect("failed to create temporary directory for socket");
        let socket = utf8(dir.path()).join("run").join("netconfd.sock");
        Self {
            endpoint: SocketEndpoint::unix(socket),
            dir,
            modules_file: None,
        }
    }

    /// Loopback TCP with an OS-assigned port.
    #[must_use]
    pub fn tcp() -> Self {
        Self {
            endpoint: SocketEndpoint::tcp("127.0.0.1", 0),
            ..Self::unix()
        }
    }

    /// Points `modules_file` at `modules.yaml` inside the temporary
    /// directory. The file is not created.
    #[must_use]
    pub fn with_manifest(mut self) -> Self {
        self.modules_file = Some(self.manifest_path());
        self
    }

    /// Location of the manifest file.
    #[must_use]
    pub fn manifest_path(&self) -> Utf8PathBuf {
        utf8(self.dir.path()).join("modules.yaml")
    }

    /// Replaces the manifest contents.
    pub fn write_manifest(&self, contents: &str) {
        std::fs::write(self.manifest_path(), contents).expect("write module manifest");
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            daemon_socket: self.endpoint.clone(),
            poll_interval_ms: 20,
            modules_file: self.modules_file.clone(),
            ..Config::default()
        })
    }
}

fn utf8(path: &std::path::Path) -> &Utf8Path {
    Utf8Path::from_path(path).expect("temporary path was not valid UTF-8")
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("netconfd"),
            OsString::from("--daemon-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}
