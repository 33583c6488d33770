//! Error taxonomy surfaced by the service orchestrator.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;
use crate::supervisor::SupervisorError;

/// Errors returned by [`crate::ServiceOrchestrator`] operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Creating the directory tree or loading the settings document failed.
    #[error("failed to initialise service in '{dir}': {source}")]
    Initialization {
        /// Configuration directory being prepared.
        dir: PathBuf,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
    /// An operation was attempted before a successful `initialize`.
    #[error("service has not been initialised")]
    NotInitialised,
    /// The requested profile identifier is outside `1..=100`.
    #[error("invalid profile id {id}: expected a value between 1 and 100")]
    InvalidProfile {
        /// Rejected identifier.
        id: i64,
    },
    /// `start_proxy` was called before a profile was loaded.
    #[error("No profile selected")]
    NoProfileSelected,
    /// No proxy-core binary was found.
    #[error("core executable not found (searched for {candidates})")]
    ExecutableNotFound {
        /// Candidate names that were searched.
        candidates: String,
    },
    /// The core process did not come up in time.
    #[error("'{program}' did not start within {timeout_ms} ms")]
    StartTimeout {
        /// Program that was being launched.
        program: String,
        /// Timeout that elapsed.
        timeout_ms: u128,
    },
    /// A settings document could not be parsed.
    #[error("failed to parse configuration: {source}")]
    ConfigParse {
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
    /// The core process died while the service was running.
    #[error("Core process crashed unexpectedly{}", exit_suffix(.status))]
    UnexpectedExit {
        /// Exit status reported by the OS, when known.
        status: Option<String>,
    },
    /// Launching a subprocess failed.
    #[error("Failed to start core process: {source}")]
    Spawn {
        /// Underlying supervisor error.
        #[source]
        source: SupervisorError,
    },
    /// Launching the tunnel process failed.
    #[error("Failed to start TUN mode: {source}")]
    Tunnel {
        /// Underlying supervisor error.
        #[source]
        source: SupervisorError,
    },
    /// Stopping a subprocess failed.
    #[error("failed to stop process: {source}")]
    Stop {
        /// Underlying supervisor error.
        #[source]
        source: SupervisorError,
    },
    /// Reading or writing the settings document failed.
    #[error("configuration store error: {source}")]
    Store {
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

fn exit_suffix(status: &Option<String>) -> String {
    status
        .as_ref()
        .map(|value| format!(" ({value})"))
        .unwrap_or_default()
}

impl ServiceError {
    /// Classifies a supervisor failure raised while starting the core.
    pub(crate) fn from_core_start(source: SupervisorError) -> Self {
        match source {
            SupervisorError::ExecutableNotFound { candidates } => {
                Self::ExecutableNotFound { candidates }
            }
            SupervisorError::StartTimeout {
                program,
                timeout_ms,
            } => Self::StartTimeout {
                program,
                timeout_ms,
            },
            other => Self::Spawn { source: other },
        }
    }

    /// Classifies a supervisor failure raised while starting the tunnel.
    pub(crate) fn from_tun_start(source: SupervisorError) -> Self {
        match source {
            SupervisorError::ExecutableNotFound { candidates } => {
                Self::ExecutableNotFound { candidates }
            }
            other => Self::Tunnel { source: other },
        }
    }

    /// Classifies a failure reading an explicitly supplied document.
    pub(crate) fn from_document_load(source: StoreError) -> Self {
        if source.is_parse_error() {
            Self::ConfigParse { source }
        } else {
            Self::Store { source }
        }
    }
}
