//! Supervises daemon launch sequencing and runtime orchestration.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nekoray_config::{Config, RuntimePaths};
use nekoray_core::{ServiceDeps, ServiceError, ServiceOrchestrator, telemetry};
use ortho_config::OrthoConfig;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::{self, ApiState};
use crate::logs::{LOG_CAPACITY, LogBuffer};
use crate::options::{DaemonOptions, split_arguments};

use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{AUTO_START_DELAY, PROCESS_TARGET, SHUTDOWN_TIMEOUT, TUN_START_DELAY};

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<S> {
    pub(crate) config: Config,
    pub(crate) options: DaemonOptions,
    pub(crate) runtime_paths: RuntimePaths,
    pub(crate) deps: ServiceDeps,
    pub(crate) shutdown: S,
}

/// Parses `args`, then runs the daemon until a termination signal arrives.
pub fn run_daemon<I>(args: I) -> Result<(), LaunchError>
where
    I: IntoIterator<Item = OsString>,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_arguments(&args);
    let options = DaemonOptions::try_parse_from(&split.daemon_arguments)
        .map_err(|source| LaunchError::Usage { source })?;
    let config = Config::load_from_iter(split.config_arguments)?;
    let _telemetry = telemetry::initialise(&config)?;

    let plan = LaunchPlan {
        deps: ServiceDeps::from_config(&config),
        runtime_paths: RuntimePaths::discover()?,
        config,
        options,
        shutdown: SystemShutdownSignal::new(SHUTDOWN_TIMEOUT),
    };
    run_daemon_with(plan)
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with<S>(plan: LaunchPlan<S>) -> Result<(), LaunchError>
where
    S: ShutdownSignal,
{
    let LaunchPlan {
        config,
        options,
        runtime_paths,
        deps,
        shutdown,
    } = plan;

    info!(
        target: PROCESS_TARGET,
        ?options,
        "starting daemon runtime"
    );
    let mut guard = ProcessGuard::acquire(runtime_paths)?;
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;

    let service = Arc::new(ServiceOrchestrator::new(deps));
    let logs = LogBuffer::attach(service.events(), LOG_CAPACITY)
        .map_err(|source| LaunchError::LogCollector { source })?;
    service.initialize(config.config_dir())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("nekorayd-http")
        .build()
        .map_err(|source| LaunchError::Runtime { source })?;
    let address = config.http_listen_address();
    let listener = runtime
        .block_on(TcpListener::bind(address.as_str()))
        .map_err(|source| LaunchError::Bind {
            address: address.clone(),
            source,
        })?;
    let local = listener
        .local_addr()
        .map_err(|source| LaunchError::Bind { address, source })?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app = api::router(ApiState::new(Arc::clone(&service), logs));
    let server = runtime.spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });
    info!(
        target: PROCESS_TARGET,
        address = %local,
        "HTTP API listening"
    );
    schedule_start_up(&runtime, &service, &options);
    guard.write_health(HealthState::Ready)?;

    let waited = shutdown.wait();
    guard.write_health(HealthState::Stopping)?;
    let _ = stop_tx.send(());
    let served = drain(&runtime, server);
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    let stopped = service.shutdown();

    waited?;
    served?;
    stopped?;
    info!(
        target: PROCESS_TARGET,
        "shutdown sequence completed"
    );
    Ok(())
}

/// Queues the `--auto-start` and `--tun` actions behind their delays.
fn schedule_start_up(runtime: &Runtime, service: &Arc<ServiceOrchestrator>, options: &DaemonOptions) {
    if let Some(profile) = options.auto_start {
        delayed(runtime, service, AUTO_START_DELAY, "auto-start", move |service| {
            service.load_profile(profile)?;
            service.start_proxy()
        });
    }
    if options.tun {
        delayed(runtime, service, TUN_START_DELAY, "tun start", |service| {
            service.start_tun_mode()
        });
    }
}

fn delayed<F>(
    runtime: &Runtime,
    service: &Arc<ServiceOrchestrator>,
    delay: Duration,
    action: &'static str,
    work: F,
) where
    F: FnOnce(&ServiceOrchestrator) -> Result<(), ServiceError> + Send + 'static,
{
    let service = Arc::clone(service);
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        info!(target: PROCESS_TARGET, action, "running start-up action");
        match tokio::task::spawn_blocking(move || work(&service)).await {
            Ok(Ok(())) => info!(target: PROCESS_TARGET, action, "start-up action completed"),
            Ok(Err(failure)) => {
                error!(target: PROCESS_TARGET, action, error = %failure, "start-up action failed");
            }
            Err(failure) => {
                error!(target: PROCESS_TARGET, action, error = %failure, "start-up action aborted");
            }
        }
    });
}

/// Waits for the HTTP server to finish in-flight requests.
fn drain(runtime: &Runtime, server: JoinHandle<std::io::Result<()>>) -> Result<(), LaunchError> {
    match runtime.block_on(tokio::time::timeout(SHUTDOWN_TIMEOUT, server)) {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(source))) => Err(LaunchError::Serve { source }),
        Ok(Err(failure)) => {
            warn!(target: PROCESS_TARGET, error = %failure, "HTTP server task aborted");
            Ok(())
        }
        Err(_) => {
            warn!(
                target: PROCESS_TARGET,
                timeout_ms = SHUTDOWN_TIMEOUT.as_millis(),
                "HTTP server did not drain in time"
            );
            Ok(())
        }
    }
}
