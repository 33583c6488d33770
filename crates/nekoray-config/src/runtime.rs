//! Derives runtime artefact paths for the daemon.
//!
//! The runtime directory houses the daemon lock, pid, and health snapshot so
//! that only one supervisor instance manages the proxy core on a host.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

use crate::defaults::APP_DIRECTORY;

/// Canonical paths for runtime artefacts written by the daemon.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
    pid_path: PathBuf,
    health_path: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths under the platform runtime directory.
    pub fn discover() -> Result<Self, RuntimePathsError> {
        Self::under(default_runtime_directory())
    }

    /// Derives runtime paths beneath an explicit directory, creating it.
    pub fn under(runtime_dir: impl Into<PathBuf>) -> Result<Self, RuntimePathsError> {
        let runtime_dir = runtime_dir.into();
        fs::create_dir_all(&runtime_dir).map_err(|source| RuntimePathsError::RuntimeDirectory {
            path: runtime_dir.clone(),
            source,
        })?;
        Ok(Self {
            lock_path: runtime_dir.join("nekorayd.lock"),
            pid_path: runtime_dir.join("nekorayd.pid"),
            health_path: runtime_dir.join("nekorayd.health"),
            runtime_dir,
        })
    }

    /// Directory holding runtime artefacts.
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the lock file guarding singleton startup.
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }

    /// Path to the PID file.
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Path to the health snapshot.
    pub fn health_path(&self) -> &Path {
        self.health_path.as_path()
    }
}

fn default_runtime_directory() -> PathBuf {
    #[cfg(unix)]
    {
        if let Some(mut dir) = runtime_dir() {
            dir.push(APP_DIRECTORY);
            return dir;
        }
        let mut dir = env::temp_dir();
        dir.push(APP_DIRECTORY);
        dir.push(format!("uid-{}", unsafe { geteuid() }));
        dir
    }

    #[cfg(not(unix))]
    {
        let mut dir = env::temp_dir();
        dir.push(APP_DIRECTORY);
        dir
    }
}

/// Errors raised while deriving daemon runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_artefact_names_beneath_directory() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let runtime = dir.path().join("nested").join("runtime");
        let paths = RuntimePaths::under(&runtime).expect("paths should derive");
        assert!(runtime.is_dir(), "runtime directory should be created");
        assert_eq!(paths.runtime_dir(), runtime.as_path());
        assert!(paths.lock_path().ends_with("nekorayd.lock"));
        assert!(paths.pid_path().ends_with("nekorayd.pid"));
        assert!(paths.health_path().ends_with("nekorayd.health"));
    }

    #[test]
    fn discovered_directory_is_namespaced() {
        let paths = RuntimePaths::discover().expect("paths should derive");
        let components: Vec<_> = paths
            .runtime_dir()
            .components()
            .filter_map(|part| part.as_os_str().to_str())
            .collect();
        assert!(
            components.contains(&APP_DIRECTORY),
            "unexpected runtime dir: {}",
            paths.runtime_dir().display()
        );
    }

    #[test]
    fn reports_uncreatable_directory() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").expect("write blocker");
        let error = RuntimePaths::under(blocker.join("runtime"))
            .expect_err("directory below a file cannot be created");
        assert!(matches!(error, RuntimePathsError::RuntimeDirectory { .. }));
    }
}
