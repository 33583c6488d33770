use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use nekoray_config::RuntimePaths;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::errors::LaunchError;

/// Holds the daemon's singleton lock for as long as it lives.
///
/// Dropping the guard removes the lock, pid, and health files.
#[derive(Debug)]
pub(crate) struct ProcessGuard {
    paths: RuntimePaths,
    _lock: File,
    pid: Option<u32>,
}

impl ProcessGuard {
    pub(crate) fn acquire(paths: RuntimePaths) -> Result<Self, LaunchError> {
        let lock = acquire_lock(&paths)?;
        Ok(Self {
            paths,
            _lock: lock,
            pid: None,
        })
    }

    pub(crate) fn write_pid(&mut self, pid: u32) -> Result<(), LaunchError> {
        let path = self.paths.pid_path();
        let pid_error = |source| LaunchError::PidWrite {
            path: path.to_path_buf(),
            source,
        };
        let mut file = private_options().open(path).map_err(pid_error)?;
        writeln!(file, "{pid}").map_err(pid_error)?;
        file.sync_all().map_err(pid_error)?;
        self.pid = Some(pid);
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %path.display(),
            "pid file written"
        );
        Ok(())
    }

    pub(crate) fn write_health(&self, state: HealthState) -> Result<(), LaunchError> {
        let pid = self.pid.ok_or(LaunchError::MissingPid)?;
        let path = self.paths.health_path();
        let health_error = |source| LaunchError::HealthWrite {
            path: path.to_path_buf(),
            source,
        };
        let snapshot = HealthSnapshot::new(state, pid)?;
        let mut file = private_options().open(path).map_err(health_error)?;
        serde_json::to_writer(&mut file, &snapshot)?;
        file.write_all(b"\n").map_err(health_error)?;
        file.sync_all().map_err(health_error)?;
        info!(
            target: PROCESS_TARGET,
            status = snapshot.status,
            file = %path.display(),
            "health snapshot updated"
        );
        Ok(())
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let artefacts = [
            ("lock", self.paths.lock_path()),
            ("pid", self.paths.pid_path()),
            ("health", self.paths.health_path()),
        ];
        for (kind, path) in artefacts {
            if let Err(error) = fs::remove_file(path)
                && error.kind() != io::ErrorKind::NotFound
            {
                warn!(
                    target: PROCESS_TARGET,
                    file = %path.display(),
                    kind,
                    error = %error,
                    "failed to remove runtime file"
                );
            }
        }
    }
}

/// Lifecycle stage recorded in the health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HealthState {
    Starting,
    Ready,
    Stopping,
}

impl HealthState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthSnapshot {
    status: &'static str,
    pid: u32,
    timestamp: u64,
}

impl HealthSnapshot {
    fn new(state: HealthState, pid: u32) -> Result<Self, LaunchError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|source| LaunchError::Clock { source })?
            .as_secs();
        Ok(Self {
            status: state.as_str(),
            pid,
            timestamp,
        })
    }
}

fn private_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

fn acquire_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(paths.lock_path()) {
        Ok(file) => {
            info!(
                target: PROCESS_TARGET,
                file = %paths.lock_path().display(),
                "acquired daemon lock"
            );
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => reclaim_lock(paths),
        Err(source) => Err(LaunchError::LockCreate {
            path: paths.lock_path().to_path_buf(),
            source,
        }),
    }
}

/// Takes over a lock whose owner is gone, or reports the live owner.
fn reclaim_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    if let Some(pid) = read_pid(paths.pid_path())
        && pid != 0
    {
        if process_alive(pid)? {
            info!(
                target: PROCESS_TARGET,
                pid,
                "refusing to start: existing daemon alive"
            );
            return Err(LaunchError::AlreadyRunning { pid });
        }
        warn!(
            target: PROCESS_TARGET,
            pid,
            "existing daemon not detected; cleaning stale files"
        );
    }
    remove_stale(paths.lock_path())?;
    remove_stale(paths.pid_path())?;
    remove_stale(paths.health_path())?;
    acquire_lock(paths)
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn remove_stale(path: &Path) -> Result<(), LaunchError> {
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(LaunchError::Cleanup {
            path: path.to_path_buf(),
            source: error,
        }),
        _ => Ok(()),
    }
}

fn process_alive(pid: u32) -> Result<bool, LaunchError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH | Errno::ECHILD) => Ok(false),
        Err(errno) => Err(LaunchError::CheckProcess { pid, source: errno }),
    }
}
