//! Fake proxy cores and helpers shared by the service suites.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tempfile::TempDir;

use crate::events::ServiceEvent;
use crate::launcher::DirectLauncher;
use crate::locator::ExecutableLocator;
use crate::orchestrator::ServiceDeps;
use crate::store::{GROUPS_DIR, SETTINGS_FILE};
use crate::supervisor::Timeouts;

pub(crate) const EVENT_WAIT: Duration = Duration::from_secs(3);

/// Shell script standing in for the proxy core.
///
/// Every invocation appends its arguments to `invocations.log`.
pub(crate) struct FakeCore {
    dir: TempDir,
    binary: PathBuf,
}

impl FakeCore {
    fn with_body(body: &str) -> Self {
        let dir = TempDir::new().expect("create fake core dir");
        let binary = dir.path().join("nekobox_core");
        let log = dir.path().join("invocations.log");
        let script = format!(
            "#!/bin/sh\necho \"$*\" >> '{}'\n{body}\n",
            log.display()
        );
        fs::write(&binary, script).expect("write fake core");
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))
            .expect("mark fake core executable");
        fs::create_dir_all(dir.path().join("run")).expect("create work dir");
        fs::create_dir_all(dir.path().join("config")).expect("create config dir");
        Self { dir, binary }
    }

    /// Core that stays up until signalled.
    pub(crate) fn long_running() -> Self {
        Self::with_body("echo \"core ready\"\necho \"core warming up\" >&2\nexec sleep 30")
    }

    /// Core that exits with status 7 shortly after starting.
    pub(crate) fn crashing() -> Self {
        Self::with_body("echo \"core ready\"\nsleep 0.5\nexit 7")
    }

    /// Arguments of every launch so far, one entry per launch.
    pub(crate) fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("invocations.log"))
            .map(|content| content.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Waits until at least `count` launches were recorded, then returns them.
    ///
    /// The script logs asynchronously after the spawn returns.
    pub(crate) fn settled_invocations(&self, count: usize) -> Vec<String> {
        let deadline = Instant::now() + EVENT_WAIT;
        while self.invocations().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        thread::sleep(Duration::from_millis(100));
        self.invocations()
    }

    /// Directory receiving generated configuration files.
    pub(crate) fn work_dir(&self) -> PathBuf {
        self.dir.path().join("run")
    }

    /// Configuration directory handed to `initialize`.
    pub(crate) fn config_dir(&self) -> PathBuf {
        self.dir.path().join("config")
    }

    /// Settings document inside [`Self::config_dir`].
    pub(crate) fn settings_path(&self) -> PathBuf {
        self.config_dir().join(GROUPS_DIR).join(SETTINGS_FILE)
    }

    /// Seeds the settings document before initialisation.
    pub(crate) fn seed_settings(&self, json: &str) {
        let path = self.settings_path();
        let parent = path.parent().expect("settings file has a parent");
        fs::create_dir_all(parent).expect("create groups dir");
        fs::write(path, json).expect("seed settings");
    }

    /// Dependencies wired to this fake with short timings.
    pub(crate) fn deps(&self) -> ServiceDeps {
        ServiceDeps::new(
            Arc::new(ExecutableLocator::fixed(&self.binary)),
            Arc::new(DirectLauncher),
        )
        .with_work_dir(self.work_dir())
        .with_timeouts(quick_timeouts())
        .with_sample_interval(Duration::from_millis(50))
        .with_restart_delay(Duration::from_millis(50))
    }
}

/// Dependencies whose locator never finds a core.
pub(crate) fn missing_core_deps(dir: &Path) -> ServiceDeps {
    ServiceDeps::new(
        Arc::new(ExecutableLocator::fixed(dir.join("absent-core"))),
        Arc::new(DirectLauncher),
    )
    .with_work_dir(dir)
    .with_timeouts(quick_timeouts())
}

pub(crate) fn quick_timeouts() -> Timeouts {
    Timeouts {
        start: Duration::from_secs(5),
        graceful_stop: Duration::from_secs(2),
        force_stop: Duration::from_secs(2),
    }
}

/// Waits for the first event matching `predicate`.
pub(crate) fn wait_for_event(
    events: &Receiver<ServiceEvent>,
    predicate: impl Fn(&ServiceEvent) -> bool,
) -> Option<ServiceEvent> {
    let deadline = Instant::now() + EVENT_WAIT;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match events.recv_timeout(remaining) {
            Ok(event) if predicate(&event) => return Some(event),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

/// Drains whatever is queued without waiting.
pub(crate) fn drain(events: &Receiver<ServiceEvent>) -> Vec<ServiceEvent> {
    events.try_iter().collect()
}
