//! Per-connection readiness loop.
//!
//! Each agent connection is served by one thread. The loop blocks on the
//! socket for at most the configured poll interval; a timeout only re-checks
//! the shutdown and close flags, a complete line runs one
//! receive-classify-dispatch-reply cycle and a hang-up tears the
//! connection's session down.

use std::io::{self, Read};
use std::net::Shutdown;
use std::sync::Arc;

use tracing::{debug, warn};

use netconfd_modules::capability::SERVER_BASE_CAPABILITIES;
use netconfd_modules::{CapabilitySet, Reply, RpcError};

use crate::sessions::Session;
use crate::state::ServerState;
use crate::transport::{ConnectionHandler, ConnectionId, ConnectionStream};

use super::DISPATCH_TARGET;
use super::dispatcher::Dispatcher;
use super::errors::DispatchError;
use super::request::{AgentMessage, Hello, RpcRequest};
use super::response::{ServerMessage, SharedWriter};

/// Maximum size of a single request line in bytes.
pub(crate) const MAX_REQUEST_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 1024;

/// What one read attempt produced.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadEvent {
    /// A complete line including its newline, or a final unterminated line.
    Line(Vec<u8>),
    /// The poll interval elapsed without a complete line.
    Timeout,
    /// The peer closed its side.
    HangUp,
}

/// Splits a byte stream into bounded lines, keeping bytes that arrive after
/// a newline for the next call.
pub(crate) struct LineReader<R> {
    inner: R,
    buffer: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub(crate) const fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    pub(crate) const fn get_ref(&self) -> &R {
        &self.inner
    }

    pub(crate) fn next_line(&mut self) -> Result<ReadEvent, DispatchError> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            if let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
                enforce_limit(position)?;
                let line = self.buffer.drain(..=position).collect();
                return Ok(ReadEvent::Line(line));
            }
            enforce_limit(self.buffer.len())?;
            match read_with_retry(&mut self.inner, &mut chunk) {
                Ok(0) if self.buffer.is_empty() => return Ok(ReadEvent::HangUp),
                Ok(0) => return Ok(ReadEvent::Line(std::mem::take(&mut self.buffer))),
                Ok(read) => self
                    .buffer
                    .extend_from_slice(chunk.get(..read).unwrap_or_default()),
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(ReadEvent::Timeout);
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

fn read_with_retry(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

fn enforce_limit(size: usize) -> Result<(), DispatchError> {
    if size > MAX_REQUEST_BYTES {
        return Err(DispatchError::request_too_large(size, MAX_REQUEST_BYTES));
    }
    Ok(())
}

/// Serves agent connections against the shared server state.
#[derive(Debug)]
pub struct SessionConnectionHandler {
    state: Arc<ServerState>,
    dispatcher: Dispatcher,
}

impl SessionConnectionHandler {
    /// Builds a handler over `state`.
    #[must_use]
    pub fn new(state: Arc<ServerState>) -> Self {
        let dispatcher = state.dispatcher();
        Self { state, dispatcher }
    }

    fn serve(&self, stream: ConnectionStream) {
        let conn_id = match self.state.connections().register(&stream) {
            Ok(conn_id) => conn_id,
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "failed to register connection");
                return;
            }
        };
        let writer = match prepare(&stream, &self.state) {
            Ok(writer) => writer,
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %conn_id, %error, "failed to prepare connection");
                self.state.connections().unregister(conn_id);
                return;
            }
        };
        debug!(target: DISPATCH_TARGET, %conn_id, "connection opened");
        let mut connection = Connection {
            state: &self.state,
            dispatcher: &self.dispatcher,
            conn_id,
            reader: LineReader::new(stream),
            writer,
            session: None,
        };
        let exit = connection.run();
        connection.teardown(exit);
    }
}

impl ConnectionHandler for SessionConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        self.serve(stream);
    }
}

fn prepare(stream: &ConnectionStream, state: &ServerState) -> io::Result<SharedWriter> {
    stream.set_read_timeout(Some(state.poll_interval()))?;
    Ok(SharedWriter::new(stream.try_clone()?))
}

/// Why a connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    HangUp,
    Closed,
    Shutdown,
    Failed,
}

impl LoopExit {
    const fn as_str(self) -> &'static str {
        match self {
            Self::HangUp => "hang-up",
            Self::Closed => "closed",
            Self::Shutdown => "shutdown",
            Self::Failed => "error",
        }
    }
}

enum Step {
    Continue,
    Close,
}

struct Connection<'a> {
    state: &'a ServerState,
    dispatcher: &'a Dispatcher,
    conn_id: ConnectionId,
    reader: LineReader<ConnectionStream>,
    writer: SharedWriter,
    session: Option<Arc<Session>>,
}

impl Connection<'_> {
    fn run(&mut self) -> LoopExit {
        loop {
            if self.state.shutdown().is_requested() {
                return LoopExit::Shutdown;
            }
            if self.state.connections().is_closing(self.conn_id) {
                return LoopExit::Closed;
            }
            let line = match self.reader.next_line() {
                Ok(ReadEvent::Line(line)) => line,
                Ok(ReadEvent::Timeout) => continue,
                Ok(ReadEvent::HangUp) => return LoopExit::HangUp,
                Err(error) => return self.fail(&error),
            };
            match self.process(&line) {
                Ok(Step::Continue) => {}
                Ok(Step::Close) => return LoopExit::Closed,
                Err(error) if error.is_recoverable() => {
                    debug!(target: DISPATCH_TARGET, conn_id = %self.conn_id, %error, "rejected request");
                    if self
                        .writer
                        .send(&ServerMessage::protocol_error(&error))
                        .is_err()
                    {
                        return LoopExit::Failed;
                    }
                }
                Err(error) => return self.fail(&error),
            }
        }
    }

    fn fail(&self, error: &DispatchError) -> LoopExit {
        warn!(target: DISPATCH_TARGET, conn_id = %self.conn_id, %error, "connection failed");
        if matches!(error, DispatchError::RequestTooLarge { .. }) {
            // Best effort: the peer may already be gone.
            self.writer
                .send(&ServerMessage::protocol_error(error))
                .ok();
        }
        LoopExit::Failed
    }

    fn process(&mut self, line: &[u8]) -> Result<Step, DispatchError> {
        let message = AgentMessage::parse(line)?;
        message.validate()?;
        match message {
            AgentMessage::Hello(hello) => self.register(hello),
            AgentMessage::GetCapabilities => {
                let mut capabilities: CapabilitySet =
                    SERVER_BASE_CAPABILITIES.into_iter().collect();
                capabilities.extend_from(&self.state.modules().capabilities());
                self.writer
                    .send(&ServerMessage::Capabilities { capabilities })?;
                Ok(Step::Continue)
            }
            AgentMessage::Rpc(request) => self.rpc(&request),
        }
    }

    fn register(&mut self, hello: Hello) -> Result<Step, DispatchError> {
        let Hello {
            session_id,
            username,
            capabilities,
        } = hello;
        let message = match self.state.sessions().add(
            session_id.trim(),
            &username,
            capabilities,
            self.conn_id,
        ) {
            Ok(session) => {
                self.state
                    .reporter()
                    .session_opened(session.id(), session.username());
                let message = ServerMessage::Registered {
                    session_id: session.id().to_owned(),
                };
                self.session = Some(session);
                message
            }
            Err(error) => ServerMessage::rpc_error(&error.to_rpc_error()),
        };
        self.writer.send(&message)?;
        Ok(Step::Continue)
    }

    fn rpc(&self, request: &RpcRequest) -> Result<Step, DispatchError> {
        let own = self.session.as_ref().ok_or(DispatchError::NoSession)?;
        let session = match self.originating_session(own, request) {
            Ok(session) => session,
            Err(error) => {
                self.reply(request, Reply::error(error))?;
                return Ok(Step::Continue);
            }
        };
        let (reply, close_connection, gate) = self
            .dispatcher
            .dispatch(&session, request, &self.writer)
            .into_parts();
        self.reply(request, reply)?;
        if let Some(gate) = gate {
            gate.open();
        }
        Ok(if close_connection {
            Step::Close
        } else {
            Step::Continue
        })
    }

    fn originating_session(
        &self,
        own: &Arc<Session>,
        request: &RpcRequest,
    ) -> Result<Arc<Session>, RpcError> {
        let session_id = request.session_id.trim();
        if session_id != own.id() {
            return Err(RpcError::operation_failed(format!(
                "session '{session_id}' is not carried by this connection"
            )));
        }
        let session = self
            .state
            .sessions()
            .get_by_id(session_id)
            .map_err(|error| error.to_rpc_error())?;
        if !Arc::ptr_eq(&session, own) || !session.is_active() {
            return Err(RpcError::operation_failed(format!(
                "session '{session_id}' is terminating"
            )));
        }
        Ok(session)
    }

    fn reply(&self, request: &RpcRequest, reply: Reply) -> Result<(), DispatchError> {
        self.writer.send(&ServerMessage::reply(
            request.session_id.trim(),
            request.message_id.as_deref(),
            reply,
        ))
    }

    fn teardown(self, exit: LoopExit) {
        if let Some(session) = &self.session {
            session.mark_terminating();
        }
        if let Err(error) = self.reader.get_ref().shutdown(Shutdown::Both) {
            debug!(target: DISPATCH_TARGET, conn_id = %self.conn_id, %error, "socket shutdown failed");
        }
        if let Some(session) = self.session
            && self.state.sessions().remove_session(&session)
        {
            self.state
                .reporter()
                .session_closed(session.id(), exit.as_str());
        }
        self.state.connections().unregister(self.conn_id);
        debug!(
            target: DISPATCH_TARGET,
            conn_id = %self.conn_id,
            reason = exit.as_str(),
            "connection closed"
        );
    }
}
