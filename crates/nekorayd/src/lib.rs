//! Long-running host for the nekoray proxy supervisor.
//!
//! `nekorayd` owns a single [`nekoray_core::ServiceOrchestrator`] for the
//! lifetime of the process and exposes it over a JSON HTTP API. Start-up
//! takes the singleton lock in the runtime directory, records the pid and a
//! health snapshot, binds the API, and optionally schedules an automatic
//! proxy start. A termination signal drains the HTTP server, stops every
//! supervised process, and persists the settings before the runtime files
//! are removed.

pub mod api;
pub mod logs;
mod options;
mod process;

pub use api::{ApiError, ApiState, router};
pub use logs::{LOG_CAPACITY, LogBuffer, LogEntry};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon};

#[cfg(test)]
mod tests;
