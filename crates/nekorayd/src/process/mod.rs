//! Daemon process supervision: singleton lock, pid and health files, and
//! shutdown handling.

use std::time::Duration;

mod errors;
mod guard;
pub(crate) mod launch;
mod shutdown;

pub use errors::LaunchError;
pub use launch::run_daemon;
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
/// Delay before `--auto-start` loads its profile and starts the proxy.
pub(crate) const AUTO_START_DELAY: Duration = Duration::from_secs(1);
/// Delay before `--tun` starts TUN mode.
pub(crate) const TUN_START_DELAY: Duration = Duration::from_secs(2);
