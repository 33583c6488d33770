//! Failures raised while supervising a subprocess.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::launcher::LaunchError;

/// Errors surfaced by [`super::ProcessSupervisor`] and its specialisations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// None of the candidate executables exist.
    #[error("core executable not found (searched for {candidates})")]
    ExecutableNotFound {
        /// Candidate names that were searched.
        candidates: String,
    },
    /// The generated configuration could not be written.
    #[error("failed to write process configuration '{path}': {source}")]
    WriteConfig {
        /// Configuration path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The privilege launcher could not prepare the command.
    #[error("failed to prepare privileged launch: {source}")]
    Launch {
        /// Underlying launcher error.
        #[from]
        source: LaunchError,
    },
    /// The OS refused to spawn the process.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program being spawned.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The spawn did not complete within the start timeout.
    #[error("'{program}' did not start within {timeout_ms} ms")]
    StartTimeout {
        /// Program being spawned.
        program: String,
        /// Timeout that elapsed.
        timeout_ms: u128,
    },
    /// The process exited before it could be handed to the supervisor.
    #[error("'{program}' exited during startup ({status})")]
    ExitedDuringStartup {
        /// Program that exited.
        program: String,
        /// Exit status reported by the OS.
        status: String,
    },
    /// A helper thread could not be created.
    #[error("failed to start supervisor thread: {source}")]
    Worker {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The process survived both graceful and forced termination.
    #[error("'{program}' (pid {pid}) did not exit after being killed")]
    StopTimeout {
        /// Program being stopped.
        program: String,
        /// Process identifier.
        pid: u32,
    },
}
