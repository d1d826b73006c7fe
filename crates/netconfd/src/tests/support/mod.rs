//! Shared fixtures for the behavioural tests.

mod config_loader;
mod dispatch_world;
mod reporter;
mod world;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use dispatch_world::{DispatchWorld, dispatch_world};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use world::{ServerWorld, unquote, wait_until, world};
