//! Behavioural tests covering daemon start-up, singleton locking, and
//! shutdown.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use nekoray_config::{Config, RuntimePaths};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::Value;
use tempfile::TempDir;

use crate::options::DaemonOptions;
use crate::process::launch::{LaunchPlan, run_daemon_with};
use crate::process::{LaunchError, ShutdownError, ShutdownSignal};
use crate::tests::support::{deps_for, write_sleeping_core};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

type StepResult = Result<(), String>;

#[fixture]
fn world() -> RefCell<DaemonWorld> {
    RefCell::new(DaemonWorld::new())
}

#[given("a daemon world")]
fn given_world(world: &RefCell<DaemonWorld>) {
    let _ = world;
}

#[given("a daemon world that auto-starts profile \"{id}\"")]
fn given_auto_start(world: &RefCell<DaemonWorld>, id: i64) {
    world.borrow_mut().options.auto_start = Some(id);
}

#[given("stale runtime files from a dead daemon")]
fn given_stale_runtime(world: &RefCell<DaemonWorld>) -> StepResult {
    let world = world.borrow();
    fs::write(world.lock_path(), b"").map_err(|error| error.to_string())?;
    fs::write(world.pid_path(), b"0\n").map_err(|error| error.to_string())?;
    Ok(())
}

#[when("the daemon starts")]
fn when_daemon_starts(world: &RefCell<DaemonWorld>) -> StepResult {
    world.borrow_mut().start()?;
    world.borrow().wait_for_ready()
}

#[when("shutdown is triggered")]
fn when_shutdown_triggered(world: &RefCell<DaemonWorld>) {
    world.borrow().shutdown.trigger();
}

#[when("the daemon run completes")]
fn when_daemon_completes(world: &RefCell<DaemonWorld>) -> StepResult {
    world.borrow_mut().join()
}

#[then("the daemon wrote the lock file")]
fn then_lock_file_exists(world: &RefCell<DaemonWorld>) {
    assert!(world.borrow().lock_path().exists(), "lock file should exist");
}

#[then("the pid file records this process")]
fn then_pid_file_records_process(world: &RefCell<DaemonWorld>) {
    let content = fs::read_to_string(world.borrow().pid_path()).expect("read pid file");
    let pid: u32 = content.trim().parse().expect("pid file holds an integer");
    assert_eq!(pid, std::process::id());
}

#[then("the health snapshot reports \"{status}\"")]
fn then_health_reports(world: &RefCell<DaemonWorld>, status: String) {
    let snapshot = world.borrow().read_health().expect("health snapshot parses");
    assert_eq!(snapshot["status"], status.as_str());
}

#[then("a second daemon fails because one is already running")]
fn then_second_instance_refused(world: &RefCell<DaemonWorld>) {
    let signal = TestShutdownSignal::default();
    signal.trigger();
    let result = run_daemon_with(world.borrow().plan(signal));
    match result {
        Err(LaunchError::AlreadyRunning { pid }) => assert_eq!(pid, std::process::id()),
        other => panic!("expected an already-running refusal, got {other:?}"),
    }
}

#[then("the proxy core is launched for profile \"{id}\"")]
fn then_core_launched(world: &RefCell<DaemonWorld>, id: u32) -> StepResult {
    let expected = format!("nekoray_core_{id}.json");
    let world = world.borrow();
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if world.invocations().iter().any(|line| line.contains(&expected)) {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }
    Err(format!("core was not launched with {expected}"))
}

#[then("the daemon run succeeded")]
fn then_daemon_succeeded(world: &RefCell<DaemonWorld>) {
    let world = world.borrow();
    let result = world.result.as_ref().expect("daemon result recorded");
    assert!(result.is_ok(), "daemon run should succeed: {result:?}");
}

#[then("the runtime files are removed")]
fn then_runtime_removed(world: &RefCell<DaemonWorld>) {
    let world = world.borrow();
    assert!(!world.lock_path().exists(), "lock file should be removed");
    assert!(!world.pid_path().exists(), "pid file should be removed");
    assert!(!world.health_path().exists(), "health file should be removed");
}

#[then("the generated core configuration is removed")]
fn then_core_config_removed(world: &RefCell<DaemonWorld>) {
    let world = world.borrow();
    let leftovers: Vec<_> = fs::read_dir(world.dir.path().join("run"))
        .expect("read work dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name())
        .collect();
    assert!(leftovers.is_empty(), "unexpected files left: {leftovers:?}");
}

struct DaemonWorld {
    options: DaemonOptions,
    shutdown: TestShutdownSignal,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
    core: PathBuf,
    runtime_paths: RuntimePaths,
    dir: TempDir,
}

impl DaemonWorld {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(dir.path().join("run")).expect("create work dir");
        let core = write_sleeping_core(dir.path());
        let runtime_paths =
            RuntimePaths::under(dir.path().join("runtime")).expect("derive runtime paths");
        Self {
            options: DaemonOptions::default(),
            shutdown: TestShutdownSignal::default(),
            handle: None,
            result: None,
            core,
            runtime_paths,
            dir,
        }
    }

    fn config(&self) -> Config {
        let config_dir = Utf8PathBuf::from_path_buf(self.dir.path().join("config"))
            .expect("temp dir is valid UTF-8");
        Config {
            config_dir: Some(config_dir),
            http_bind: "127.0.0.1".to_owned(),
            http_port: 0,
            ..Config::default()
        }
    }

    fn plan<S: ShutdownSignal>(&self, shutdown: S) -> LaunchPlan<S> {
        LaunchPlan {
            config: self.config(),
            options: self.options.clone(),
            runtime_paths: self.runtime_paths.clone(),
            deps: deps_for(self.dir.path(), self.core.clone()),
            shutdown,
        }
    }

    fn start(&mut self) -> StepResult {
        if self.handle.is_some() {
            return Err("daemon already started".to_owned());
        }
        let plan = self.plan(self.shutdown.clone());
        self.handle = Some(thread::spawn(move || run_daemon_with(plan)));
        Ok(())
    }

    fn wait_for_ready(&self) -> StepResult {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if self
                .read_health()
                .is_ok_and(|snapshot| snapshot["status"] == "ready")
            {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err("daemon did not publish a ready health snapshot".to_owned())
    }

    fn join(&mut self) -> StepResult {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| "daemon not started".to_owned())?;
        let result = handle
            .join()
            .map_err(|_| "daemon thread panicked".to_owned())?;
        self.result = Some(result);
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        self.runtime_paths.lock_path().to_path_buf()
    }

    fn pid_path(&self) -> PathBuf {
        self.runtime_paths.pid_path().to_path_buf()
    }

    fn health_path(&self) -> PathBuf {
        self.runtime_paths.health_path().to_path_buf()
    }

    fn read_health(&self) -> Result<Value, String> {
        let content = fs::read_to_string(self.health_path()).map_err(|error| error.to_string())?;
        serde_json::from_str(&content).map_err(|error| error.to_string())
    }

    fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("invocations.log"))
            .map(|content| content.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}

impl Drop for DaemonWorld {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Clone, Default)]
struct TestShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl TestShutdownSignal {
    fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        *triggered = true;
        cvar.notify_all();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        while !*triggered {
            triggered = cvar
                .wait(triggered)
                .expect("shutdown mutex poisoned during wait");
        }
        Ok(())
    }
}

#[scenario(path = "tests/features/daemon_process.feature", name = "Serving until shutdown")]
fn serving_until_shutdown(#[from(world)] _: RefCell<DaemonWorld>) {}

#[scenario(
    path = "tests/features/daemon_process.feature",
    name = "Refusing a second instance"
)]
fn refusing_a_second_instance(#[from(world)] _: RefCell<DaemonWorld>) {}

#[scenario(path = "tests/features/daemon_process.feature", name = "Reclaiming a stale lock")]
fn reclaiming_a_stale_lock(#[from(world)] _: RefCell<DaemonWorld>) {}

#[scenario(path = "tests/features/daemon_process.feature", name = "Auto-starting a profile")]
fn auto_starting_a_profile(#[from(world)] _: RefCell<DaemonWorld>) {}
