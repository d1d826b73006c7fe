//! Classification and execution of session requests.
//!
//! Every request that reaches the [`Dispatcher`] produces exactly one
//! [`Reply`]. Failures of the request itself travel inside that reply; the
//! dispatcher never errors out of band.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info};

use netconfd_modules::capability::NOTIFICATION_1_0;
use netconfd_modules::{ErrorKind, ModuleRegistry, Reply, RpcError};

use super::DISPATCH_TARGET;
use super::request::{OperationKind, RpcRequest};
use super::response::SharedWriter;
use super::subscription::{DeliveryTask, ReplyGate, SubscriptionParams};
use crate::matcher::eligible_modules;
use crate::sessions::{Session, SessionRegistry};
use crate::transport::{CloseMode, SessionTransport};

/// Gracefully ends the requesting session.
pub const CLOSE_SESSION: &str = "close-session";
/// Forcibly ends another session.
pub const KILL_SESSION: &str = "kill-session";
/// Starts notification delivery.
pub const CREATE_SUBSCRIPTION: &str = "create-subscription";
/// Retrieves configuration and state; module state data is merged in.
pub const GET: &str = "get";

const KILL_TARGET: &str = "session-id";

/// Outcome of dispatching one request.
#[derive(Debug)]
pub struct Dispatched {
    reply: Reply,
    close_connection: bool,
    gate: Option<ReplyGate>,
}

impl Dispatched {
    fn reply(reply: Reply) -> Self {
        Self {
            reply,
            close_connection: false,
            gate: None,
        }
    }

    fn failure(error: RpcError) -> Self {
        Self::reply(Reply::error(error))
    }

    /// Reply to send back.
    #[must_use]
    pub const fn outcome(&self) -> &Reply {
        &self.reply
    }

    /// Whether the connection loop ends once the reply is written.
    #[must_use]
    pub const fn closes_connection(&self) -> bool {
        self.close_connection
    }

    pub(crate) fn into_parts(self) -> (Reply, bool, Option<ReplyGate>) {
        (self.reply, self.close_connection, self.gate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    CloseSession,
    KillSession,
    Subscribe,
    Device,
    Rejected(OperationKind),
}

fn route(request: &RpcRequest) -> Route {
    let operation = request.operation();
    let kind = request.op_kind.unwrap_or(match operation {
        CLOSE_SESSION | KILL_SESSION => OperationKind::Lifecycle,
        CREATE_SUBSCRIPTION => OperationKind::Notification,
        _ => OperationKind::Device,
    });
    match (kind, operation) {
        (OperationKind::Lifecycle, CLOSE_SESSION) => Route::CloseSession,
        (OperationKind::Lifecycle, KILL_SESSION) => Route::KillSession,
        (OperationKind::Notification, CREATE_SUBSCRIPTION) => Route::Subscribe,
        (OperationKind::Device, _) => Route::Device,
        (rejected, _) => Route::Rejected(rejected),
    }
}

/// Routes requests of established sessions.
#[derive(Clone)]
pub struct Dispatcher {
    sessions: Arc<SessionRegistry>,
    modules: Arc<ModuleRegistry>,
    transport: Arc<dyn SessionTransport>,
    poll_interval: Duration,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Dispatcher")
            .field("sessions", &self.sessions)
            .field("modules", &self.modules)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Builds a dispatcher over shared registries and the transport.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionRegistry>,
        modules: Arc<ModuleRegistry>,
        transport: Arc<dyn SessionTransport>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sessions,
            modules,
            transport,
            poll_interval,
        }
    }

    /// Runs `request` on behalf of `session`.
    ///
    /// `writer` is the session's connection; a subscription streams its
    /// notifications there.
    #[must_use]
    pub fn dispatch(
        &self,
        session: &Session,
        request: &RpcRequest,
        writer: &SharedWriter,
    ) -> Dispatched {
        let route = route(request);
        debug!(
            target: DISPATCH_TARGET,
            session = session.id(),
            operation = request.operation(),
            ?route,
            "dispatching request"
        );
        match route {
            Route::CloseSession => self.close_session(session),
            Route::KillSession => self.kill_session(session, &request.payload),
            Route::Subscribe => self.create_subscription(session, &request.payload, writer),
            Route::Device => Dispatched::reply(self.device_operation(session, request)),
            Route::Rejected(kind) => Dispatched::failure(RpcError::operation_failed(format!(
                "'{}' is not a {kind} operation",
                request.operation()
            ))),
        }
    }

    fn close_session(&self, session: &Session) -> Dispatched {
        session.mark_terminating();
        let reply = match self
            .transport
            .close_connection(session.conn_id(), CloseMode::AfterReply)
        {
            Ok(()) => Reply::Ok,
            Err(error) => Reply::error(RpcError::operation_failed(error.to_string())),
        };
        info!(target: DISPATCH_TARGET, session = session.id(), "session closing");
        Dispatched {
            reply,
            close_connection: true,
            gate: None,
        }
    }

    fn kill_session(&self, session: &Session, payload: &Value) -> Dispatched {
        let target_id = match kill_target(payload) {
            Ok(target_id) => target_id,
            Err(error) => return Dispatched::failure(error),
        };
        if target_id == session.id() {
            return self.close_session(session);
        }
        let target = match self.sessions.get_by_id(&target_id) {
            Ok(target) => target,
            Err(error) => {
                return Dispatched::failure(RpcError::operation_failed(error.to_string()));
            }
        };
        target.mark_terminating();
        let closed = self
            .transport
            .close_connection(target.conn_id(), CloseMode::Immediate);
        if !self.sessions.remove_session(&target) {
            debug!(
                target: DISPATCH_TARGET,
                killed = target.id(),
                "killed session was already removed"
            );
        }
        info!(
            target: DISPATCH_TARGET,
            session = session.id(),
            killed = target.id(),
            "session killed"
        );
        match closed {
            Ok(()) => Dispatched::reply(Reply::Ok),
            Err(error) => Dispatched::failure(RpcError::operation_failed(error.to_string())),
        }
    }

    fn create_subscription(
        &self,
        session: &Session,
        payload: &Value,
        writer: &SharedWriter,
    ) -> Dispatched {
        if !session.capabilities().contains(NOTIFICATION_1_0) {
            return Dispatched::failure(RpcError::not_supported(
                "session did not negotiate the notification capability",
            ));
        }
        if session.has_active_subscription() {
            return Dispatched::failure(already_subscribed());
        }
        let params = match SubscriptionParams::from_payload(payload, OffsetDateTime::now_utc()) {
            Ok(params) => params,
            Err(error) => return Dispatched::failure(error),
        };
        let (replay, subscription) = self
            .modules
            .notifications()
            .subscribe_with_replay(params.start_time(), params.stop_time());
        let task = DeliveryTask {
            session_id: session.id().to_owned(),
            params,
            replay,
            subscription,
            writer: writer.clone(),
            poll_interval: self.poll_interval,
        };
        let (handle, gate) = match task.spawn() {
            Ok(started) => started,
            Err(error) => {
                return Dispatched::failure(RpcError::operation_failed(format!(
                    "failed to start notification delivery: {error}"
                )));
            }
        };
        if let Err(rejected) = session.attach_subscription(handle) {
            drop(gate);
            rejected.cancel_and_join();
            return Dispatched::failure(already_subscribed());
        }
        debug!(target: DISPATCH_TARGET, session = session.id(), "subscription started");
        Dispatched {
            reply: Reply::Ok,
            close_connection: false,
            gate: Some(gate),
        }
    }

    fn device_operation(&self, session: &Session, request: &RpcRequest) -> Reply {
        let operation = request.operation();
        let modules = eligible_modules(&self.modules, session, operation);
        if modules.is_empty() {
            return Reply::error(RpcError::not_supported(format!(
                "no module supports '{operation}' for this session"
            )));
        }
        let mut aggregate: Option<Reply> = None;
        for module in &modules {
            let mut reply = module.execute(session.context(), operation, &request.payload);
            if operation == GET && !reply.is_error() {
                reply = match module.state_data() {
                    Ok(Value::Null) => reply,
                    Ok(state) => reply.merge(Reply::data(state)),
                    Err(error) => Reply::error(RpcError::operation_failed(error.to_string())),
                };
            }
            if reply.is_error() {
                debug!(
                    target: DISPATCH_TARGET,
                    session = session.id(),
                    module = module.name(),
                    operation,
                    "module failed; skipping remaining modules"
                );
                return reply;
            }
            aggregate = Some(match aggregate {
                Some(earlier) => earlier.merge(reply),
                None => reply,
            });
        }
        aggregate.unwrap_or(Reply::Ok)
    }
}

fn already_subscribed() -> RpcError {
    RpcError::new(
        ErrorKind::AlreadySubscribed,
        "session already has an active subscription",
    )
}

fn kill_target(payload: &Value) -> Result<String, RpcError> {
    match payload.get(KILL_TARGET) {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_owned()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        None | Some(Value::Null | Value::String(_)) => Err(RpcError::missing_parameter(KILL_TARGET)),
        Some(_) => Err(RpcError::invalid_value(
            KILL_TARGET,
            "session-id must be a string or a number",
        )),
    }
}
