//! Test double for [`HealthReporter`] that records structured events for
//! assertions.

use std::sync::Mutex;

use netconfd_config::Config;
use netconfd_modules::{ModuleError, ModuleInfo};

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ModuleLoaded(String),
    ModuleFailed { name: String, message: String },
    ModuleRemoved(String),
    SessionOpened(String),
    SessionClosed { session_id: String, reason: String },
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn module_loaded(&self, module: &ModuleInfo) {
        self.record(HealthEvent::ModuleLoaded(module.name().to_owned()));
    }

    fn module_failed(&self, name: &str, error: &ModuleError) {
        self.record(HealthEvent::ModuleFailed {
            name: name.to_owned(),
            message: error.to_string(),
        });
    }

    fn module_removed(&self, name: &str) {
        self.record(HealthEvent::ModuleRemoved(name.to_owned()));
    }

    fn session_opened(&self, session_id: &str, _username: &str) {
        self.record(HealthEvent::SessionOpened(session_id.to_owned()));
    }

    fn session_closed(&self, session_id: &str, reason: &str) {
        self.record(HealthEvent::SessionClosed {
            session_id: session_id.to_owned(),
            reason: reason.to_owned(),
        });
    }
}
