//! Defines the unified error surface for daemon launch and supervision.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTimeError;

use nix::errno::Errno;
use thiserror::Error;

use nekoray_config::RuntimePathsError;
use nekoray_core::{ServiceError, TelemetryError};
use ortho_config::OrthoError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The daemon's own flags were rejected.
    #[error("{source}")]
    Usage {
        /// Parser error, rendered with usage help.
        #[source]
        source: clap::Error,
    },
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry could not be installed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The runtime directory could not be created.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Lock file creation failed.
    #[error("failed to create lock file '{path}': {source}")]
    LockCreate {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A running daemon already holds the lock.
    #[error("daemon already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded in the existing PID file.
        pid: u32,
    },
    /// Removing a stale runtime artefact failed.
    #[error("failed to remove stale file '{path}': {source}")]
    Cleanup {
        /// Path of the artefact that could not be removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the health snapshot failed.
    #[error("failed to write health snapshot '{path}': {source}")]
    HealthWrite {
        /// Health file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serialising the health snapshot failed.
    #[error("failed to serialise health snapshot: {source}")]
    HealthSerialise {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// Obtaining the current timestamp failed.
    #[error("failed to read system time: {source}")]
    Clock {
        /// Underlying system time error.
        #[source]
        source: SystemTimeError,
    },
    /// Attempting to probe an existing PID failed.
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess {
        /// PID that failed to probe.
        pid: u32,
        /// Underlying OS error.
        source: Errno,
    },
    /// Health updates were attempted before writing the PID file.
    #[error("pid must be written before updating health state")]
    MissingPid,
    /// The service layer could not be brought up.
    #[error("failed to initialise proxy service: {source}")]
    Service {
        /// Underlying service error.
        #[source]
        source: ServiceError,
    },
    /// The log collector thread could not be spawned.
    #[error("failed to start log collector: {source}")]
    LogCollector {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The async runtime could not be built.
    #[error("failed to build async runtime: {source}")]
    Runtime {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Binding the HTTP listener failed.
    #[error("failed to bind HTTP API on {address}: {source}")]
    Bind {
        /// Requested listen address.
        address: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The HTTP server stopped with an error.
    #[error("HTTP server failed: {source}")]
    Serve {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<RuntimePathsError> for LaunchError {
    fn from(source: RuntimePathsError) -> Self {
        match source {
            RuntimePathsError::RuntimeDirectory { path, source } => {
                Self::RuntimeDirectory { path, source }
            }
        }
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<ServiceError> for LaunchError {
    fn from(source: ServiceError) -> Self {
        Self::Service { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
