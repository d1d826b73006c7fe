//! BDD test world for in-process dispatch: registries, a recording
//! transport and mock device modules that count their invocations.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use netconfd_modules::{
    CapabilitySet, ErrorKind, MockDeviceModule, ModuleDescriptor, ModuleRegistry, Reply, RpcError,
};

use crate::dispatch::test_support::SharedBuffer;
use crate::dispatch::{Dispatched, Dispatcher, RpcRequest, SharedWriter};
use crate::sessions::{Session, SessionRegistry};
use crate::transport::{CloseMode, ConnectionId, SessionTransport, TransportError};

/// Transport that accepts every close request and remembers it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    closed: Mutex<Vec<(ConnectionId, CloseMode)>>,
}

impl RecordingTransport {
    /// Close requests seen so far.
    pub fn closed(&self) -> Vec<(ConnectionId, CloseMode)> {
        self.closed.lock().expect("transport mutex poisoned").clone()
    }
}

impl SessionTransport for RecordingTransport {
    fn close_connection(
        &self,
        conn_id: ConnectionId,
        mode: CloseMode,
    ) -> Result<(), TransportError> {
        self.closed
            .lock()
            .expect("transport mutex poisoned")
            .push((conn_id, mode));
        Ok(())
    }
}

/// Scenario world shared across dispatch steps.
pub struct DispatchWorld {
    pub sessions: Arc<SessionRegistry>,
    pub modules: Arc<ModuleRegistry>,
    pub transport: Arc<RecordingTransport>,
    writer: SharedWriter,
    next_conn: u64,
    calls: HashMap<String, Arc<AtomicUsize>>,
    dispatched: Vec<Dispatched>,
}

impl DispatchWorld {
    /// Empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::new()),
            modules: Arc::new(ModuleRegistry::default()),
            transport: Arc::new(RecordingTransport::default()),
            writer: SharedWriter::new(SharedBuffer::default()),
            next_conn: 1,
            calls: HashMap::new(),
            dispatched: Vec::new(),
        }
    }

    /// Registers a session on a fresh connection.
    pub fn add_session(&mut self, session_id: &str, capabilities: CapabilitySet) {
        let conn = ConnectionId::new(self.next_conn);
        self.next_conn += 1;
        self.sessions
            .add(session_id, "admin", capabilities, conn)
            .expect("register session");
    }

    /// Registers a mock module answering every call with `reply`.
    pub fn add_module(&mut self, name: &str, capability: &str, operation: &str, reply: Reply) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut module = MockDeviceModule::new();
        module.expect_init().returning(|_| Ok(Value::Null));
        module.expect_close().return_const(());
        module
            .expect_execute_operation()
            .returning(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                reply.clone()
            });
        module.expect_get_state_data().returning(|| Ok(Value::Null));
        let capabilities: CapabilitySet = [capability].into_iter().collect();
        self.modules
            .add(
                ModuleDescriptor::new(name, capabilities, [operation]),
                Box::new(module),
            )
            .expect("register module");
        self.calls.insert(name.to_owned(), calls);
    }

    /// Registers a mock module failing every call with `OperationFailed`.
    pub fn add_failing_module(&mut self, name: &str, capability: &str, operation: &str) {
        let reply = Reply::error(RpcError::new(
            ErrorKind::OperationFailed,
            format!("{name} rejected {operation}"),
        ));
        self.add_module(name, capability, operation, reply);
    }

    /// Dispatches `request` on behalf of its session and keeps the outcome
    /// alive so subscription tasks survive until the scenario ends.
    pub fn dispatch(&mut self, request: &RpcRequest) {
        let session: Arc<Session> = self
            .sessions
            .get_by_id(&request.session_id)
            .expect("session registered");
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.sessions),
            Arc::clone(&self.modules),
            self.transport.clone(),
            Duration::from_millis(20),
        );
        let dispatched = dispatcher.dispatch(&session, request, &self.writer);
        self.dispatched.push(dispatched);
    }

    /// Reply of the most recent dispatch.
    #[must_use]
    pub fn last_reply(&self) -> &Reply {
        self.dispatched
            .last()
            .expect("nothing was dispatched")
            .outcome()
    }

    /// How often module `name` executed an operation.
    #[must_use]
    pub fn calls(&self, name: &str) -> usize {
        self.calls
            .get(name)
            .unwrap_or_else(|| panic!("no module named {name}"))
            .load(Ordering::SeqCst)
    }
}

impl Default for DispatchWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Default dispatch world fixture.
#[must_use]
pub fn dispatch_world() -> RefCell<DispatchWorld> {
    RefCell::new(DispatchWorld::new())
}
