use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{ExitHook, LaunchSpec, ProcessSupervisor, SUPERVISOR_TARGET, SupervisorError, Timeouts};
use crate::events::{EventBus, OutputSource};
use crate::generator::{TunConfigGenerator, TunSettings, tun_file_stem, write_json};
use crate::launcher::{LaunchCommand, PrivilegeLauncher};
use crate::locator::CoreLocator;

/// Wait allowed for the system-wide interrupt helper.
const INTERRUPT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Supervises the privileged tunnel process.
#[derive(Debug)]
pub struct TunSupervisor {
    process: ProcessSupervisor,
    locator: Arc<dyn CoreLocator>,
    launcher: Arc<dyn PrivilegeLauncher>,
    work_dir: PathBuf,
}

impl TunSupervisor {
    /// Creates a supervisor that launches through `launcher`.
    #[must_use]
    pub fn new(
        locator: Arc<dyn CoreLocator>,
        launcher: Arc<dyn PrivilegeLauncher>,
        work_dir: PathBuf,
        events: EventBus,
        timeouts: Timeouts,
        exit_hook: Option<ExitHook>,
    ) -> Self {
        Self {
            process: ProcessSupervisor::new(OutputSource::Tun, events, timeouts, exit_hook),
            locator,
            launcher,
            work_dir,
        }
    }

    /// Starts the tunnel unless it is already running.
    pub fn start(&self, settings: &TunSettings) -> Result<(), SupervisorError> {
        if self.process.is_running() {
            return Ok(());
        }
        let core = self
            .locator
            .locate()
            .ok_or_else(|| SupervisorError::ExecutableNotFound {
                candidates: self.locator.describe_candidates(),
            })?;

        let config_path = self.work_dir.join(format!("{}.json", tun_file_stem(settings)));
        let document = TunConfigGenerator::new(settings.clone()).render();
        write_json(&config_path, &document).map_err(|source| SupervisorError::WriteConfig {
            path: config_path.clone(),
            source,
        })?;

        let command = match self.launcher.command(&core, &config_path) {
            Ok(command) => command,
            Err(error) => {
                if let Err(remove_error) = std::fs::remove_file(&config_path) {
                    debug!(
                        target: SUPERVISOR_TARGET,
                        file = %config_path.display(),
                        error = %remove_error,
                        "failed to remove tunnel config after launch error"
                    );
                }
                return Err(error.into());
            }
        };

        let mut temp_files = vec![config_path];
        temp_files.extend(command.script.clone());
        info!(
            target: SUPERVISOR_TARGET,
            interface = %settings.interface_name,
            socks_port = settings.socks_port,
            "starting tunnel"
        );
        self.process
            .start(LaunchSpec {
                program: command.program,
                args: command.args,
                temp_files,
            })
            .map(drop)
    }

    /// Stops the tunnel, first signalling same-named processes system-wide.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        if self.process.is_running() {
            self.interrupt_system_wide();
        }
        self.process.stop()
    }

    /// Whether the tunnel process is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    fn interrupt_system_wide(&self) {
        let Some(core) = self.locator.locate() else {
            return;
        };
        let Some(command) = self.launcher.interrupt_command(&core) else {
            return;
        };
        run_bounded(&command, &core, INTERRUPT_TIMEOUT);
    }
}

fn run_bounded(command: &LaunchCommand, core: &Path, timeout: Duration) {
    let mut child = match Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(error) => {
            warn!(
                target: SUPERVISOR_TARGET,
                core = %core.display(),
                error = %error,
                "failed to run tunnel interrupt helper"
            );
            return;
        }
    };

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(target: SUPERVISOR_TARGET, %status, "tunnel interrupt helper finished");
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            Ok(None) | Err(_) => break,
        }
    }
    warn!(target: SUPERVISOR_TARGET, "tunnel interrupt helper timed out");
    if let Err(error) = child.kill() {
        debug!(target: SUPERVISOR_TARGET, error = %error, "failed to kill interrupt helper");
    }
    if let Err(error) = child.wait() {
        debug!(target: SUPERVISOR_TARGET, error = %error, "failed to reap interrupt helper");
    }
}
