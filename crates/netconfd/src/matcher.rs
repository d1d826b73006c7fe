//! Capability-based module selection.

use netconfd_modules::{ModuleRef, ModuleRegistry};

use crate::sessions::Session;

/// Modules that may run `operation` for `session`, in registration order.
///
/// A module qualifies when it is allowed, declares the operation and shares
/// at least one capability with the session. An empty result means the
/// operation is not supported for this session.
#[must_use]
pub fn eligible_modules(
    registry: &ModuleRegistry,
    session: &Session,
    operation: &str,
) -> Vec<ModuleRef> {
    registry.matching(operation, session.capabilities())
}
