//! JSONL request dispatch for agent connections.
//!
//! Every agent connection carries a stream of JSON lines. The connection
//! loop in [`SessionConnectionHandler`] registers the session named by the
//! agent's `hello`, then hands each `rpc` to the [`Dispatcher`], which
//! classifies it and produces exactly one reply:
//!
//! ```json
//! {"kind":"rpc","session_id":"17","message_id":"4","operation":"kill-session","payload":{"session-id":"9"}}
//! {"kind":"reply","session_id":"17","message_id":"4","reply":{"status":"ok"}}
//! ```
//!
//! ## Routing
//!
//! `close-session` and `kill-session` act on the session registry and the
//! transport, `create-subscription` starts a notification task bound to the
//! session, and every other operation is fanned out to the device modules
//! whose capabilities intersect the session's.

mod dispatcher;
mod errors;
mod handler;
mod request;
mod response;
mod subscription;
#[cfg(test)]
pub(crate) mod test_support;

pub use self::dispatcher::{
    CLOSE_SESSION, CREATE_SUBSCRIPTION, Dispatched, Dispatcher, GET, KILL_SESSION,
};
pub use self::errors::DispatchError;
pub use self::handler::SessionConnectionHandler;
pub use self::request::{AgentMessage, Hello, OperationKind, RpcRequest};
pub use self::response::{ResponseWriter, ServerMessage, SharedWriter};
pub(crate) use self::subscription::SubscriptionHandle;
pub use self::subscription::{NOTIFICATION_COMPLETE, REPLAY_COMPLETE, SubscriptionParams};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
