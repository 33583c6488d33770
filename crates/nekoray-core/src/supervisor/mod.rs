//! Supervision of the proxy core and tunnel subprocesses.
//!
//! [`ProcessSupervisor`] owns at most one child process. It spawns the child
//! on a worker thread so the caller can bound the wait, relays the child's
//! output onto the [`EventBus`], and runs a monitor thread that reports exits
//! nobody asked for. Every temporary file handed to a launch is removed when
//! the process is stopped, including after a forced kill.

mod core_process;
mod errors;
mod output;
mod tun_process;

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{SendError, bounded};
use tracing::{debug, info, warn};

use crate::events::{EventBus, OutputSource, OutputStream};

pub use self::core_process::CoreSupervisor;
pub use self::errors::SupervisorError;
pub use self::tun_process::TunSupervisor;

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Bounds applied to waits on a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum wait for the spawn to complete.
    pub start: Duration,
    /// Wait after the graceful termination request.
    pub graceful_stop: Duration,
    /// Wait after the forced kill.
    pub force_stop: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            start: Duration::from_millis(5000),
            graceful_stop: Duration::from_millis(5000),
            force_stop: Duration::from_millis(2000),
        }
    }
}

/// Report delivered when a process exits without being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// Process kind that exited.
    pub source: OutputSource,
    /// Run the process belonged to.
    pub run_id: u64,
    /// OS process identifier.
    pub pid: u32,
    /// Exit status, when it could be collected.
    pub status: Option<ExitStatus>,
}

impl ExitReport {
    /// Exit status rendered for humans.
    #[must_use]
    pub fn describe_status(&self) -> Option<String> {
        self.status.map(|status| status.to_string())
    }
}

/// Callback invoked from the monitor thread on an unexpected exit.
pub type ExitHook = Arc<dyn Fn(ExitReport) + Send + Sync>;

/// What to spawn and which files belong to the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to spawn.
    pub program: OsString,
    /// Arguments passed to the executable.
    pub args: Vec<OsString>,
    /// Generated files removed when the process stops.
    pub temp_files: Vec<PathBuf>,
}

struct RunningProcess {
    child: Arc<Mutex<Child>>,
    pid: u32,
    run_id: u64,
    program: String,
    expected_exit: Arc<AtomicBool>,
    temp_files: Vec<PathBuf>,
}

impl RunningProcess {
    fn is_alive(&self) -> bool {
        matches!(lock_child(&self.child).try_wait(), Ok(None))
    }
}

enum ProcessState {
    Idle,
    Running(RunningProcess),
}

/// Owns at most one child process.
pub struct ProcessSupervisor {
    source: OutputSource,
    events: EventBus,
    timeouts: Timeouts,
    state: Mutex<ProcessState>,
    next_run: AtomicU64,
    exit_hook: Option<ExitHook>,
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("source", &self.source)
            .field("timeouts", &self.timeouts)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    /// Creates an idle supervisor.
    #[must_use]
    pub fn new(
        source: OutputSource,
        events: EventBus,
        timeouts: Timeouts,
        exit_hook: Option<ExitHook>,
    ) -> Self {
        Self {
            source,
            events,
            timeouts,
            state: Mutex::new(ProcessState::Idle),
            next_run: AtomicU64::new(0),
            exit_hook,
        }
    }

    /// Starts the process unless one is already alive.
    ///
    /// Returns the run identifier of the live process. A handle whose process
    /// already died is released before the new spawn.
    pub fn start(&self, spec: LaunchSpec) -> Result<u64, SupervisorError> {
        let mut state = self.lock_state();
        if let ProcessState::Running(process) = &*state
            && process.is_alive()
        {
            debug!(
                target: SUPERVISOR_TARGET,
                source = %self.source,
                pid = process.pid,
                "process already running"
            );
            remove_temp_files(self.source, &spec.temp_files, &process.temp_files);
            return Ok(process.run_id);
        }
        if let ProcessState::Running(stale) = std::mem::replace(&mut *state, ProcessState::Idle) {
            self.release_stale(&stale);
        }

        match self.launch(&spec) {
            Ok(process) => {
                let run_id = process.run_id;
                *state = ProcessState::Running(process);
                Ok(run_id)
            }
            Err(error) => {
                remove_temp_files(self.source, &spec.temp_files, &[]);
                Err(error)
            }
        }
    }

    /// Stops the process, escalating to a kill after the graceful timeout.
    ///
    /// Succeeds immediately when nothing is running. Temporary files are
    /// removed on every path.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let mut state = self.lock_state();
        let ProcessState::Running(process) = std::mem::replace(&mut *state, ProcessState::Idle)
        else {
            return Ok(());
        };
        process.expected_exit.store(true, Ordering::Release);
        let outcome = self.terminate(&process);
        remove_temp_files(self.source, &process.temp_files, &[]);
        outcome
    }

    /// Whether the held process is alive according to the OS.
    #[must_use]
    pub fn is_running(&self) -> bool {
        match &*self.lock_state() {
            ProcessState::Running(process) => process.is_alive(),
            ProcessState::Idle => false,
        }
    }

    /// Run identifier of the live process, if any.
    #[must_use]
    pub fn running_run_id(&self) -> Option<u64> {
        match &*self.lock_state() {
            ProcessState::Running(process) if process.is_alive() => Some(process.run_id),
            _ => None,
        }
    }

    /// OS identifier of the held process, alive or not.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match &*self.lock_state() {
            ProcessState::Running(process) => Some(process.pid),
            ProcessState::Idle => None,
        }
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<RunningProcess, SupervisorError> {
        let program = spec.program.to_string_lossy().into_owned();
        debug!(
            target: SUPERVISOR_TARGET,
            source = %self.source,
            program = %program,
            args = ?spec.args,
            "spawning process"
        );
        let mut child = self.spawn_with_timeout(spec, &program)?;
        let pid = child.id();

        if let Err(source) = self.attach_relays(&mut child) {
            discard_child(&mut child);
            return Err(SupervisorError::Worker { source });
        }

        if let Ok(Some(status)) = child.try_wait() {
            return Err(SupervisorError::ExitedDuringStartup {
                program,
                status: status.to_string(),
            });
        }

        let run_id = self.next_run.fetch_add(1, Ordering::SeqCst) + 1;
        let child = Arc::new(Mutex::new(child));
        let expected_exit = Arc::new(AtomicBool::new(false));
        if let Err(source) = self.spawn_monitor(&child, &expected_exit, run_id, pid) {
            discard_child(&mut lock_child(&child));
            return Err(SupervisorError::Worker { source });
        }

        info!(
            target: SUPERVISOR_TARGET,
            source = %self.source,
            pid,
            run_id,
            program = %program,
            "process started"
        );
        Ok(RunningProcess {
            child,
            pid,
            run_id,
            program,
            expected_exit,
            temp_files: spec.temp_files.clone(),
        })
    }

    fn spawn_with_timeout(&self, spec: &LaunchSpec, program: &str) -> Result<Child, SupervisorError> {
        let (sender, receiver) = bounded(1);
        let executable = spec.program.clone();
        let args = spec.args.clone();
        thread::Builder::new()
            .name(format!("{}-spawn", self.source))
            .spawn(move || {
                let result = Command::new(&executable)
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn();
                // The caller stopped waiting; nobody else will reap this child.
                if let Err(SendError(Ok(mut orphan))) = sender.send(result) {
                    discard_child(&mut orphan);
                }
            })
            .map_err(|source| SupervisorError::Worker { source })?;

        match receiver.recv_timeout(self.timeouts.start) {
            Ok(Ok(child)) => Ok(child),
            Ok(Err(source)) => Err(SupervisorError::Spawn {
                program: program.to_owned(),
                source,
            }),
            Err(_) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    source = %self.source,
                    program,
                    "process did not start in time"
                );
                Err(SupervisorError::StartTimeout {
                    program: program.to_owned(),
                    timeout_ms: self.timeouts.start.as_millis(),
                })
            }
        }
    }

    fn attach_relays(&self, child: &mut Child) -> io::Result<()> {
        if let Some(stdout) = child.stdout.take() {
            output::spawn_relay(stdout, self.source, OutputStream::Stdout, self.events.clone())?;
        }
        if let Some(stderr) = child.stderr.take() {
            output::spawn_relay(stderr, self.source, OutputStream::Stderr, self.events.clone())?;
        }
        Ok(())
    }

    fn spawn_monitor(
        &self,
        child: &Arc<Mutex<Child>>,
        expected_exit: &Arc<AtomicBool>,
        run_id: u64,
        pid: u32,
    ) -> io::Result<()> {
        let child = Arc::clone(child);
        let expected_exit = Arc::clone(expected_exit);
        let hook = self.exit_hook.clone();
        let source = self.source;
        thread::Builder::new()
            .name(format!("{source}-monitor"))
            .spawn(move || {
                let Some(status) = await_unexpected_exit(&child, &expected_exit) else {
                    return;
                };
                warn!(
                    target: SUPERVISOR_TARGET,
                    source = %source,
                    pid,
                    run_id,
                    status = ?status,
                    "process exited unexpectedly"
                );
                if let Some(hook) = hook {
                    hook(ExitReport {
                        source,
                        run_id,
                        pid,
                        status,
                    });
                }
            })
            .map(drop)
    }

    fn terminate(&self, process: &RunningProcess) -> Result<(), SupervisorError> {
        if let Some(status) = wait_for_exit(&process.child, Duration::ZERO) {
            debug!(
                target: SUPERVISOR_TARGET,
                source = %self.source,
                pid = process.pid,
                %status,
                "process had already exited"
            );
            return Ok(());
        }

        request_termination(&process.child, process.pid);
        if let Some(status) = wait_for_exit(&process.child, self.timeouts.graceful_stop) {
            info!(
                target: SUPERVISOR_TARGET,
                source = %self.source,
                pid = process.pid,
                %status,
                "process stopped"
            );
            return Ok(());
        }

        warn!(
            target: SUPERVISOR_TARGET,
            source = %self.source,
            pid = process.pid,
            "process ignored termination request; killing"
        );
        if let Err(error) = lock_child(&process.child).kill() {
            warn!(
                target: SUPERVISOR_TARGET,
                source = %self.source,
                pid = process.pid,
                error = %error,
                "failed to kill process"
            );
        }
        if wait_for_exit(&process.child, self.timeouts.force_stop).is_some() {
            return Ok(());
        }
        Err(SupervisorError::StopTimeout {
            program: process.program.clone(),
            pid: process.pid,
        })
    }

    fn release_stale(&self, stale: &RunningProcess) {
        stale.expected_exit.store(true, Ordering::Release);
        debug!(
            target: SUPERVISOR_TARGET,
            source = %self.source,
            pid = stale.pid,
            "releasing handle of exited process"
        );
        remove_temp_files(self.source, &stale.temp_files, &[]);
    }

    fn lock_state(&self) -> MutexGuard<'_, ProcessState> {
        // Recover from poisoning so a panicked caller cannot strand the child.
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            warn!(
                target: SUPERVISOR_TARGET,
                source = %self.source,
                error = %error,
                "failed to stop process during drop"
            );
        }
    }
}

fn lock_child(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Polls until the child exits or a stop is requested.
///
/// Returns `None` when the exit was requested, otherwise the collected status.
fn await_unexpected_exit(
    child: &Mutex<Child>,
    expected_exit: &AtomicBool,
) -> Option<Option<ExitStatus>> {
    let status = loop {
        if expected_exit.load(Ordering::Acquire) {
            return None;
        }
        let polled = lock_child(child).try_wait();
        match polled {
            Ok(Some(status)) => break Some(status),
            Ok(None) => thread::sleep(MONITOR_INTERVAL),
            Err(_) => break None,
        }
    };
    if expected_exit.load(Ordering::Acquire) {
        return None;
    }
    Some(status)
}

fn wait_for_exit(child: &Mutex<Child>, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match lock_child(child).try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(_) => return None,
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(unix)]
fn request_termination(_child: &Mutex<Child>, pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => warn!(
            target: SUPERVISOR_TARGET,
            pid,
            error = %errno,
            "failed to send SIGTERM"
        ),
    }
}

#[cfg(not(unix))]
fn request_termination(child: &Mutex<Child>, pid: u32) {
    if let Err(error) = lock_child(child).kill() {
        warn!(
            target: SUPERVISOR_TARGET,
            pid,
            error = %error,
            "failed to terminate process"
        );
    }
}

fn discard_child(child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!(target: SUPERVISOR_TARGET, error = %error, "failed to kill discarded child");
    }
    if let Err(error) = child.wait() {
        debug!(target: SUPERVISOR_TARGET, error = %error, "failed to reap discarded child");
    }
}

/// Removes `files`, skipping any path listed in `keep`.
fn remove_temp_files(source: OutputSource, files: &[PathBuf], keep: &[PathBuf]) {
    for path in files.iter().filter(|path| !keep.contains(path)) {
        match fs::remove_file(path) {
            Ok(()) => debug!(
                target: SUPERVISOR_TARGET,
                source = %source,
                file = %path.display(),
                "temporary file removed"
            ),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: SUPERVISOR_TARGET,
                source = %source,
                file = %path.display(),
                error = %error,
                "failed to remove temporary file"
            ),
        }
    }
}
