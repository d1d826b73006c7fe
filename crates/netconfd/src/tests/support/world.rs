//! BDD test world for bootstrap and end-to-end scenarios: loader, reporter,
//! the bootstrapped server, its listener and any connected agents.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use netconfd_modules::{ModuleFactory, SYSTEM_CAPABILITY};

use crate::agent::AgentClient;
use crate::bootstrap::{BootstrapError, ConfigLoader, bootstrap_with};
use crate::catalog::SyncSummary;
use crate::dispatch::ServerMessage;
use crate::server::{RunningServer, Server};

use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::reporter::RecordingHealthReporter;

const AGENT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Scenario world shared across BDD steps.
pub struct ServerWorld {
    loader: Box<dyn ConfigLoader>,
    manifest: Option<TestConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    server: Option<Server>,
    running: Option<RunningServer>,
    bootstrap_error: Option<BootstrapError>,
    reload: Option<SyncSummary>,
    agents: HashMap<String, AgentClient>,
    last_message: HashMap<String, ServerMessage>,
}

impl ServerWorld {
    /// Builds a world with a successful configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loader: Box::new(TestConfigLoader::unix()),
            manifest: None,
            reporter: Arc::new(RecordingHealthReporter::default()),
            server: None,
            running: None,
            bootstrap_error: None,
            reload: None,
            agents: HashMap::new(),
            last_message: HashMap::new(),
        }
    }

    /// Installs a loader that succeeds, listening on a Unix socket.
    pub fn use_successful_loader(&mut self) {
        self.loader = Box::new(TestConfigLoader::unix());
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
    }

    /// Installs a loader listening on loopback TCP.
    pub fn use_tcp_loader(&mut self) {
        self.loader = Box::new(TestConfigLoader::tcp());
    }

    /// Installs a loader naming a manifest file with `contents`, or no
    /// file at all when `contents` is `None`.
    pub fn use_manifest(&mut self, contents: Option<&str>) {
        let loader = TestConfigLoader::unix().with_manifest();
        if let Some(text) = contents {
            loader.write_manifest(text);
        }
        self.manifest = Some(loader);
    }

    /// Rewrites the manifest installed by [`Self::use_manifest`].
    pub fn rewrite_manifest(&self, contents: &str) {
        self.manifest
            .as_ref()
            .expect("scenario did not install a manifest")
            .write_manifest(contents);
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.server.is_some() || self.bootstrap_error.is_some() {
            return;
        }
        let loader: &dyn ConfigLoader = match &self.manifest {
            Some(manifest) => manifest,
            None => &*self.loader,
        };
        match bootstrap_with(
            loader,
            self.reporter.clone(),
            ModuleFactory::with_builtins(),
        ) {
            Ok(server) => self.server = Some(server),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    /// Bootstraps if needed and starts the listener.
    pub fn start(&mut self) {
        self.bootstrap();
        let server = self.server().expect("bootstrap failed");
        self.running = Some(server.listen().expect("listener starts"));
    }

    /// Applies the current manifest to the running registry.
    pub fn reload(&mut self) {
        let summary = self
            .server()
            .expect("server bootstrapped")
            .reload_modules()
            .expect("manifest reloads");
        self.reload = Some(summary);
    }

    /// Bootstrapped server, if any.
    #[must_use]
    pub const fn server(&self) -> Option<&Server> {
        self.server.as_ref()
    }

    /// Returns the bootstrap error, if bootstrap failed.
    #[must_use]
    pub const fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    /// Summary of the last reload.
    #[must_use]
    pub const fn reload_summary(&self) -> Option<&SyncSummary> {
        self.reload.as_ref()
    }

    /// Connects a new agent under `name` and registers `session_id` with the
    /// system capability, returning the server's answer.
    pub fn register_agent(&mut self, name: &str, session_id: &str) -> ServerMessage {
        let endpoint = self
            .running
            .as_ref()
            .expect("server is listening")
            .endpoint()
            .clone();
        let mut agent = AgentClient::connect(&endpoint).expect("agent connects");
        agent
            .set_read_timeout(Some(AGENT_READ_TIMEOUT))
            .expect("set agent timeout");
        let answer = agent
            .hello(session_id, "admin", [SYSTEM_CAPABILITY].into_iter().collect())
            .expect("hello answered");
        self.agents.insert(name.to_owned(), agent);
        self.last_message.insert(name.to_owned(), answer.clone());
        answer
    }

    /// Agent registered under `name`.
    pub fn agent(&mut self, name: &str) -> &mut AgentClient {
        self.agents
            .get_mut(name)
            .unwrap_or_else(|| panic!("no agent named {name}"))
    }

    /// Records the last message an agent received.
    pub fn remember(&mut self, name: &str, message: ServerMessage) {
        self.last_message.insert(name.to_owned(), message);
    }

    /// Last message an agent received.
    #[must_use]
    pub fn last_message(&self, name: &str) -> &ServerMessage {
        self.last_message
            .get(name)
            .unwrap_or_else(|| panic!("agent {name} received nothing"))
    }

    /// Live session count on the running server.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.server().map_or(0, |server| server.state().sessions().len())
    }
}

impl Default for ServerWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ServerWorld {
    fn drop(&mut self) {
        self.agents.clear();
        if let Some(running) = self.running.take() {
            drop(running.shutdown());
        }
    }
}

/// Default server world fixture.
#[must_use]
pub fn world() -> RefCell<ServerWorld> {
    RefCell::new(ServerWorld::new())
}

/// Strips the quotes Gherkin step arguments carry.
#[must_use]
pub fn unquote(value: &str) -> &str {
    value.trim_matches('"')
}

/// Polls `condition` until it holds or two seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
