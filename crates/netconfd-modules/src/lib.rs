//! Device module contract and registry for the `netconfd` server.
//!
//! A device module implements a slice of the device's management interface:
//! a set of NETCONF operations valid for sessions that negotiated at least
//! one of the module's capabilities. The server owns one
//! [`ModuleRegistry`]; connection threads consult it to find the modules
//! eligible for each request and call them through [`ModuleRef`].
//!
//! # Example
//!
//! ```
//! use netconfd_modules::{
//!     CapabilitySet, ModuleDescriptor, ModuleFactory, ModuleRegistry, SessionContext,
//!     SYSTEM_CAPABILITY, SYSTEM_OPERATIONS,
//! };
//! use serde_json::json;
//!
//! let factory = ModuleFactory::with_builtins();
//! let registry = ModuleRegistry::default();
//! let capabilities: CapabilitySet = [SYSTEM_CAPABILITY].into_iter().collect();
//! registry
//!     .add(
//!         ModuleDescriptor::new("system", capabilities.clone(), SYSTEM_OPERATIONS),
//!         factory.instantiate("system").expect("built-in"),
//!     )
//!     .expect("register");
//!
//! let session = SessionContext::new("1", "admin", capabilities);
//! let modules = registry.matching("set-hostname", session.capabilities());
//! assert_eq!(modules.len(), 1);
//! let reply = modules[0].execute(&session, "set-hostname", &json!("edge1"));
//! assert!(!reply.is_error());
//! ```

pub mod capability;
pub mod contract;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod notification;
pub mod registry;
pub mod reply;
pub mod system;

#[cfg(test)]
mod tests;

pub use self::capability::CapabilitySet;
#[cfg(any(test, feature = "test-support"))]
pub use self::contract::MockDeviceModule;
pub use self::contract::{DeviceModule, ModuleContext, ModuleFailure, SessionContext, StateSnapshot};
pub use self::descriptor::{ModuleDescriptor, ModuleHandle, RepositoryId};
pub use self::error::ModuleError;
pub use self::factory::{ModuleFactory, SYSTEM_IMPLEMENTATION};
pub use self::notification::{
    NETCONF_STREAM, Notification, NotificationBus, NotificationSubscription,
};
pub use self::registry::{ModuleInfo, ModuleRef, ModuleRegistry};
pub use self::reply::{ErrorKind, Reply, RpcError, merge_values};
pub use self::system::{SYSTEM_CAPABILITY, SYSTEM_OPERATIONS, SystemModule};
