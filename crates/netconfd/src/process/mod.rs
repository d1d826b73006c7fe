//! Process supervision: launch sequencing and signal-driven shutdown.

mod errors;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use errors::LaunchError;
pub use launch::run_daemon;
pub use shutdown::{
    FORCED_EXIT_STATUS, ShutdownError, ShutdownFlag, ShutdownSignal, SignalAction, SignalState,
    SystemShutdownSignal,
};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
