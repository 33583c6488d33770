//! Resolves the proxy-core executable.
//!
//! Resolution order: an explicit override (configuration or the
//! `NEKORAY_CORE_BIN` environment variable), then each candidate name beside
//! the running executable, then each candidate on `PATH`.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

const LOCATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::locator");

/// Environment variable naming an explicit core binary.
pub const CORE_BIN_ENV: &str = "NEKORAY_CORE_BIN";

/// Binary names searched for, in priority order.
pub const CORE_CANDIDATES: [&str; 3] = ["nekobox_core", "nekoray_core", "sing-box"];

/// Finds the proxy-core executable.
pub trait CoreLocator: Send + Sync + fmt::Debug {
    /// Returns the executable to launch, if one exists.
    fn locate(&self) -> Option<PathBuf>;

    /// Human-readable list of what was searched for.
    fn describe_candidates(&self) -> String {
        CORE_CANDIDATES.join(", ")
    }
}

/// Searches an override, sibling directories, and `PATH`.
#[derive(Debug, Clone, Default)]
pub struct ExecutableLocator {
    override_path: Option<PathBuf>,
    search_dirs: Vec<PathBuf>,
    path_var: Option<OsString>,
}

impl ExecutableLocator {
    /// Locator for the running system.
    ///
    /// `override_path` takes precedence over `NEKORAY_CORE_BIN`.
    #[must_use]
    pub fn system(override_path: Option<PathBuf>) -> Self {
        let override_path = override_path.or_else(|| env::var_os(CORE_BIN_ENV).map(PathBuf::from));
        let search_dirs = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .into_iter()
            .collect();
        Self {
            override_path,
            search_dirs,
            path_var: env::var_os("PATH"),
        }
    }

    /// Locator that only ever returns `path`.
    #[must_use]
    pub fn fixed(path: impl Into<PathBuf>) -> Self {
        Self {
            override_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Locator that searches only the given directories.
    #[must_use]
    pub fn in_directories(dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            search_dirs: dirs.into_iter().collect(),
            ..Self::default()
        }
    }

    fn search(&self) -> Option<PathBuf> {
        let path_dirs = self
            .path_var
            .as_ref()
            .map(|value| env::split_paths(value).collect::<Vec<_>>())
            .unwrap_or_default();
        self.search_dirs
            .iter()
            .chain(path_dirs.iter())
            .flat_map(|dir| CORE_CANDIDATES.iter().map(move |name| dir.join(binary_name(name))))
            .find(|candidate| is_executable(candidate))
    }
}

impl CoreLocator for ExecutableLocator {
    fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.override_path {
            if is_executable(path) {
                return Some(path.clone());
            }
            tracing::warn!(
                target: LOCATOR_TARGET,
                path = %path.display(),
                "configured core executable is missing; searching candidates"
            );
        }
        let found = self.search();
        match &found {
            Some(path) => tracing::debug!(
                target: LOCATOR_TARGET,
                path = %path.display(),
                "core executable resolved"
            ),
            None => tracing::debug!(
                target: LOCATOR_TARGET,
                candidates = %self.describe_candidates(),
                "no core executable found"
            ),
        }
        found
    }
}

fn binary_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_owned()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
