use std::path::PathBuf;
use std::sync::Arc;

use super::{ExitHook, LaunchSpec, ProcessSupervisor, SupervisorError, Timeouts};
use crate::events::{EventBus, OutputSource};
use crate::generator::{CoreConfigGenerator, InboundSettings, core_config_file_name, write_json};
use crate::launcher::core_arguments;
use crate::locator::CoreLocator;
use crate::state::ProfileId;

/// Supervises the proxy-core process.
#[derive(Debug)]
pub struct CoreSupervisor {
    process: ProcessSupervisor,
    locator: Arc<dyn CoreLocator>,
    work_dir: PathBuf,
}

impl CoreSupervisor {
    /// Creates a supervisor writing generated configs into `work_dir`.
    #[must_use]
    pub fn new(
        locator: Arc<dyn CoreLocator>,
        work_dir: PathBuf,
        events: EventBus,
        timeouts: Timeouts,
        exit_hook: Option<ExitHook>,
    ) -> Self {
        Self {
            process: ProcessSupervisor::new(OutputSource::Core, events, timeouts, exit_hook),
            locator,
            work_dir,
        }
    }

    /// Starts the core for `profile`, returning the run identifier.
    ///
    /// An already running core is left untouched.
    pub fn start(
        &self,
        profile: ProfileId,
        inbound: &InboundSettings,
    ) -> Result<u64, SupervisorError> {
        if let Some(run_id) = self.process.running_run_id() {
            return Ok(run_id);
        }
        let core = self
            .locator
            .locate()
            .ok_or_else(|| SupervisorError::ExecutableNotFound {
                candidates: self.locator.describe_candidates(),
            })?;

        let config_path = self.work_dir.join(core_config_file_name(profile));
        let document = CoreConfigGenerator::new(inbound.clone()).render(profile);
        write_json(&config_path, &document).map_err(|source| SupervisorError::WriteConfig {
            path: config_path.clone(),
            source,
        })?;

        self.process.start(LaunchSpec {
            program: core.into_os_string(),
            args: core_arguments(&config_path),
            temp_files: vec![config_path],
        })
    }

    /// Stops the core and removes its generated configuration.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        self.process.stop()
    }

    /// Whether the core process is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    /// OS identifier of the core process, if one is held.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Directory receiving generated configurations.
    #[must_use]
    pub fn work_dir(&self) -> &std::path::Path {
        &self.work_dir
    }
}
