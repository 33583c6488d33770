use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nekoray_config::Config;

use crate::launcher::{self, PrivilegeLauncher};
use crate::locator::{CoreLocator, ExecutableLocator};
use crate::supervisor::Timeouts;
use crate::traffic::{NullTrafficProbe, SAMPLE_INTERVAL, TrafficProbe};

/// Settling delay between the stop and start halves of a restart.
pub const RESTART_DELAY: Duration = Duration::from_millis(500);

/// Collaborators injected into [`super::ServiceOrchestrator`].
#[derive(Clone)]
pub struct ServiceDeps {
    /// Finds the proxy-core executable.
    pub locator: Arc<dyn CoreLocator>,
    /// Builds the privileged tunnel command line.
    pub launcher: Arc<dyn PrivilegeLauncher>,
    /// Supplies traffic totals while running.
    pub probe: Arc<dyn TrafficProbe>,
    /// Directory receiving generated configs and scripts.
    pub work_dir: PathBuf,
    /// Waits applied to subprocess start and stop.
    pub timeouts: Timeouts,
    /// Interval between traffic samples.
    pub sample_interval: Duration,
    /// Delay inside `restart_proxy`.
    pub restart_delay: Duration,
}

impl fmt::Debug for ServiceDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDeps")
            .field("locator", &self.locator)
            .field("launcher", &self.launcher)
            .field("work_dir", &self.work_dir)
            .field("timeouts", &self.timeouts)
            .field("sample_interval", &self.sample_interval)
            .field("restart_delay", &self.restart_delay)
            .finish_non_exhaustive()
    }
}

impl ServiceDeps {
    /// Dependencies with the given locator and launcher and default timings.
    #[must_use]
    pub fn new(locator: Arc<dyn CoreLocator>, launcher: Arc<dyn PrivilegeLauncher>) -> Self {
        Self {
            locator,
            launcher,
            probe: Arc::new(NullTrafficProbe),
            work_dir: env::temp_dir(),
            timeouts: Timeouts::default(),
            sample_interval: SAMPLE_INTERVAL,
            restart_delay: RESTART_DELAY,
        }
    }

    /// Dependencies for the running host.
    #[must_use]
    pub fn system(core_override: Option<PathBuf>) -> Self {
        Self::new(
            Arc::new(ExecutableLocator::system(core_override)),
            Arc::from(launcher::for_current_platform()),
        )
    }

    /// Host dependencies honouring the configured core path.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::system(config.core_path().map(|path| path.as_std_path().to_path_buf()))
    }

    /// Replaces the traffic probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn TrafficProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replaces the directory for generated files.
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Replaces the subprocess timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replaces the traffic sampling interval.
    #[must_use]
    pub const fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Replaces the restart settling delay.
    #[must_use]
    pub const fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }
}
