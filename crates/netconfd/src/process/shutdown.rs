//! Signal-driven shutdown and reload.
//!
//! The first SIGINT, SIGTERM or SIGQUIT starts a graceful shutdown by
//! setting the shared [`ShutdownFlag`]. A second termination signal before
//! the process exits terminates it immediately with a failure status.
//! SIGHUP asks for the module manifest to be reloaded.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{error, info, warn};

use super::PROCESS_TARGET;

/// Exit status used when a second termination signal arrives.
pub const FORCED_EXIT_STATUS: i32 = 1;

/// Cooperative shutdown flag observed by the accept loop and every
/// connection loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Creates a cleared flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every loop to finish its current cycle and stop.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// What the supervisor does in response to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Begin graceful shutdown.
    Shutdown,
    /// Terminate immediately.
    ForceExit,
    /// Reload the module manifest.
    Reload,
    /// Nothing to do.
    Ignore,
}

/// Two-strike termination state machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalState {
    shutting_down: bool,
}

impl SignalState {
    /// Records `signal` and returns the resulting action.
    pub const fn on_signal(&mut self, signal: i32) -> SignalAction {
        match signal {
            SIGINT | SIGTERM | SIGQUIT => {
                if self.shutting_down {
                    SignalAction::ForceExit
                } else {
                    self.shutting_down = true;
                    SignalAction::Shutdown
                }
            }
            SIGHUP if !self.shutting_down => SignalAction::Reload,
            _ => SignalAction::Ignore,
        }
    }
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed, calling `reload` for every
    /// reload request received meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the listener cannot be installed.
    fn wait(&self, reload: &mut dyn FnMut()) -> Result<(), ShutdownError>;
}

/// Shutdown listener driven by POSIX signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Builds a signal listener.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self, reload: &mut dyn FnMut()) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let mut state = SignalState::default();
        for signal in signals.forever() {
            match state.on_signal(signal) {
                SignalAction::Shutdown => {
                    info!(target: PROCESS_TARGET, signal, "shutdown signal received");
                    break;
                }
                SignalAction::Reload => {
                    info!(target: PROCESS_TARGET, signal, "reload signal received");
                    reload();
                }
                SignalAction::ForceExit | SignalAction::Ignore => {}
            }
        }
        watch_for_second_strike(signals, state);
        Ok(())
    }
}

/// Keeps listening while the graceful shutdown runs so a repeated
/// termination signal still ends the process.
fn watch_for_second_strike(mut signals: Signals, mut state: SignalState) {
    let spawned = thread::Builder::new()
        .name("netconfd-signals".to_owned())
        .spawn(move || {
            for signal in signals.forever() {
                if state.on_signal(signal) == SignalAction::ForceExit {
                    error!(
                        target: PROCESS_TARGET,
                        signal,
                        "second termination signal; exiting immediately"
                    );
                    std::process::exit(FORCED_EXIT_STATUS);
                }
            }
        });
    if let Err(spawn_error) = spawned {
        warn!(
            target: PROCESS_TARGET,
            error = %spawn_error,
            "failed to start signal watcher; a second signal will not force exit"
        );
    }
}
