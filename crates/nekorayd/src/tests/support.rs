//! Orchestrators wired to temporary directories for the daemon suites.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nekoray_core::launcher::DirectLauncher;
use nekoray_core::locator::ExecutableLocator;
use nekoray_core::supervisor::Timeouts;
use nekoray_core::{ServiceDeps, ServiceOrchestrator};
use tempfile::TempDir;

use crate::api::ApiState;
use crate::logs::{LOG_CAPACITY, LogBuffer};

/// Short waits keep failing lifecycle tests fast.
pub(crate) fn quick_timeouts() -> Timeouts {
    Timeouts {
        start: Duration::from_secs(5),
        graceful_stop: Duration::from_secs(2),
        force_stop: Duration::from_secs(2),
    }
}

/// Dependencies rooted in `dir`, launching `core`.
pub(crate) fn deps_for(dir: &Path, core: PathBuf) -> ServiceDeps {
    ServiceDeps::new(
        Arc::new(ExecutableLocator::fixed(core)),
        Arc::new(DirectLauncher),
    )
    .with_work_dir(dir.join("run"))
    .with_timeouts(quick_timeouts())
    .with_sample_interval(Duration::from_millis(50))
    .with_restart_delay(Duration::from_millis(50))
}

/// Writes a core stand-in that idles until signalled.
///
/// Each launch appends its arguments to `invocations.log` beside the script.
#[cfg(unix)]
pub(crate) fn write_sleeping_core(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let binary = dir.join("nekobox_core");
    let log = dir.join("invocations.log");
    let script = format!(
        "#!/bin/sh\necho \"$*\" >> '{}'\necho \"core ready\"\nexec sleep 30\n",
        log.display()
    );
    fs::write(&binary, script).expect("write fake core");
    fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))
        .expect("mark fake core executable");
    binary
}

/// An initialised orchestrator plus the API state built around it.
///
/// Field order matters: the service must shut down before the directory
/// holding its files is removed.
pub(crate) struct ServiceHarness {
    pub(crate) state: ApiState,
    pub(crate) service: Arc<ServiceOrchestrator>,
    dir: TempDir,
}

impl ServiceHarness {
    /// Service whose core executable does not exist.
    pub(crate) fn without_core() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let core = dir.path().join("absent-core");
        Self::build(dir, core)
    }

    /// Service launching a shell script that sleeps until stopped.
    #[cfg(unix)]
    pub(crate) fn with_sleeping_core() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let core = write_sleeping_core(dir.path());
        Self::build(dir, core)
    }

    fn build(dir: TempDir, core: PathBuf) -> Self {
        fs::create_dir_all(dir.path().join("run")).expect("create work dir");
        let service = Arc::new(ServiceOrchestrator::new(deps_for(dir.path(), core)));
        let logs = LogBuffer::attach(service.events(), LOG_CAPACITY).expect("attach log buffer");
        service
            .initialize(dir.path().join("config"))
            .expect("initialise service");
        Self {
            state: ApiState::new(Arc::clone(&service), logs),
            service,
            dir,
        }
    }

    /// Settings document written by the service.
    pub(crate) fn settings_path(&self) -> PathBuf {
        self.dir
            .path()
            .join("config")
            .join("groups")
            .join("nekobox.json")
    }
}
