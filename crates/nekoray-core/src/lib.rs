//! Headless supervision of the nekoray proxy core.
//!
//! The crate owns the proxy lifecycle: it persists settings through
//! [`ConfigStore`], renders the core and tunnel configuration documents,
//! launches and monitors the core executable, and optionally runs a
//! privileged TUN process beside it. [`ServiceOrchestrator`] is the single
//! entry point; the CLI and the HTTP daemon are thin surfaces over it.
//!
//! ## Lifecycle
//!
//! ```text
//! Stopped --start--> Starting --ok--> Running --stop--> Stopping --> Stopped
//!                        |               |
//!                        +--fail--> Error <--core crash--+
//! ```
//!
//! Every state change, profile selection, traffic sample, error, and line of
//! subprocess output is published on the [`EventBus`]. Subscribers receive
//! events on bounded channels and never block the publisher.

mod error;
pub mod events;
pub mod generator;
pub mod launcher;
pub mod locator;
mod orchestrator;
mod state;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod traffic;

pub use error::ServiceError;
pub use events::{EventBus, LogLevel, OutputSource, OutputStream, ServiceEvent};
pub use orchestrator::{RESTART_DELAY, ServiceDeps, ServiceOrchestrator};
pub use state::{ProfileId, ServiceState};
pub use store::{ConfigDocument, ConfigStore, StoreError};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use traffic::{TrafficProbe, TrafficTotals};

#[cfg(test)]
mod tests;
