//! Lifecycle orchestration of the proxy core.
//!
//! [`ServiceOrchestrator`] is the single owner of the service state machine.
//! Lifecycle operations are serialised behind one lock; the status itself
//! lives behind a separate lock so readers never wait on a start or stop in
//! progress. Supervisors report unexpected exits through hooks that hold a
//! weak reference back to the shared state.

mod deps;

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;

use crossbeam_channel::Receiver;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::events::{EventBus, LogLevel, ServiceEvent};
use crate::generator::{InboundSettings, TunSettings, document_bool};
use crate::state::{ProfileId, ServiceState};
use crate::store::{
    ConfigDocument, ConfigStore, GROUPS_DIR, PROFILES_DIR, ROUTES_DIR, StoreError,
    default_document, keys, merge_with_defaults, read_document,
};
use crate::supervisor::{CoreSupervisor, ExitHook, ExitReport, TunSupervisor};
use crate::traffic::{TrafficCounters, TrafficProbe, TrafficSampler};

pub use self::deps::{RESTART_DELAY, ServiceDeps};

const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

/// Owns the proxy lifecycle, its configuration, and its subprocesses.
pub struct ServiceOrchestrator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ServiceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceOrchestrator")
            .field("status", &self.shared.status())
            .finish_non_exhaustive()
    }
}

struct Shared {
    inner: Mutex<ServiceInner>,
    status: Mutex<ServiceState>,
    events: EventBus,
    traffic: Arc<TrafficCounters>,
    probe: Arc<dyn TrafficProbe>,
    sample_interval: std::time::Duration,
    restart_delay: std::time::Duration,
}

struct ServiceInner {
    store: Option<ConfigStore>,
    current: ConfigDocument,
    defaults: ConfigDocument,
    overrides: ConfigDocument,
    profile: Option<ProfileId>,
    core: CoreSupervisor,
    tun: TunSupervisor,
    sampler: Option<TrafficSampler>,
    core_run: Option<u64>,
}

impl ServiceInner {
    fn effective(&self) -> ConfigDocument {
        let mut effective = merge_with_defaults(&self.current, &self.defaults);
        effective.extend(self.overrides.clone());
        effective
    }

    fn inbound(&self) -> InboundSettings {
        InboundSettings::from_document(&self.effective())
    }

    fn stop_sampler(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }
    }
}

impl ServiceOrchestrator {
    /// Creates an uninitialised orchestrator in the `Stopped` state.
    #[must_use]
    pub fn new(deps: ServiceDeps) -> Self {
        let events = EventBus::new();
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let core_hook = exit_hook(weak, Shared::on_core_exit);
            let tun_hook = exit_hook(weak, Shared::on_tun_exit);
            let core = CoreSupervisor::new(
                Arc::clone(&deps.locator),
                deps.work_dir.clone(),
                events.clone(),
                deps.timeouts,
                Some(core_hook),
            );
            let tun = TunSupervisor::new(
                deps.locator,
                deps.launcher,
                deps.work_dir,
                events.clone(),
                deps.timeouts,
                Some(tun_hook),
            );
            Shared {
                inner: Mutex::new(ServiceInner {
                    store: None,
                    current: ConfigDocument::new(),
                    defaults: default_document(),
                    overrides: ConfigDocument::new(),
                    profile: None,
                    core,
                    tun,
                    sampler: None,
                    core_run: None,
                }),
                status: Mutex::new(ServiceState::Stopped),
                events,
                traffic: Arc::new(TrafficCounters::default()),
                probe: deps.probe,
                sample_interval: deps.sample_interval,
                restart_delay: deps.restart_delay,
            }
        });
        Self { shared }
    }

    /// Prepares `config_dir` and loads the persisted settings.
    ///
    /// Creates the `profiles`, `groups`, and `routes` folders, merges the
    /// stored document with the defaults, and writes the merged result back.
    /// Calling it again stops anything running and reloads from disk.
    pub fn initialize(&self, config_dir: impl AsRef<Path>) -> Result<(), ServiceError> {
        let dir = config_dir.as_ref();
        let mut inner = self.shared.lock_inner();
        if self.shared.status() != ServiceState::Stopped {
            self.shared.stop_locked(&mut inner)?;
        }

        let (store, document) = match bootstrap(dir, &inner.defaults) {
            Ok(loaded) => loaded,
            Err(source) => {
                let error = ServiceError::Initialization {
                    dir: dir.to_path_buf(),
                    source,
                };
                self.shared.report(&error);
                return Err(error);
            }
        };
        inner.current = document;
        inner.store = Some(store);
        self.shared.set_status(ServiceState::Stopped);
        info!(
            target: SERVICE_TARGET,
            dir = %dir.display(),
            keys = inner.current.len(),
            "service initialised"
        );
        Ok(())
    }

    /// Selects the profile used by subsequent starts.
    ///
    /// A running core keeps its profile until the next restart.
    pub fn load_profile(&self, profile_id: i64) -> Result<(), ServiceError> {
        let mut inner = self.shared.lock_inner();
        self.shared.require_initialised(&inner)?;
        let profile = ProfileId::new(profile_id).inspect_err(|error| self.shared.report(error))?;
        inner.profile = Some(profile);
        info!(target: SERVICE_TARGET, profile = %profile, "profile loaded");
        self.shared.events.publish(ServiceEvent::ProfileChanged(profile));
        Ok(())
    }

    /// Starts the core for the selected profile.
    ///
    /// Succeeds without side effects when the proxy is already running. The
    /// tunnel is started as well when the settings request VPN mode; a tunnel
    /// failure is logged and the proxy keeps running without it.
    pub fn start_proxy(&self) -> Result<(), ServiceError> {
        let mut inner = self.shared.lock_inner();
        self.shared.require_initialised(&inner)?;
        self.shared.start_locked(&mut inner)
    }

    /// Stops the tunnel and the core.
    ///
    /// Succeeds without side effects when the proxy is already stopped.
    pub fn stop_proxy(&self) -> Result<(), ServiceError> {
        let mut inner = self.shared.lock_inner();
        self.shared.require_initialised(&inner)?;
        self.shared.stop_locked(&mut inner)
    }

    /// Stops, waits for the settling delay, then starts again.
    ///
    /// The lifecycle lock is held throughout, so no other operation can
    /// observe the gap between the two halves.
    pub fn restart_proxy(&self) -> Result<(), ServiceError> {
        let mut inner = self.shared.lock_inner();
        self.shared.require_initialised(&inner)?;
        self.shared.stop_locked(&mut inner)?;
        thread::sleep(self.shared.restart_delay);
        self.shared.start_locked(&mut inner)
    }

    /// Starts the privileged tunnel on its own.
    pub fn start_tun_mode(&self) -> Result<(), ServiceError> {
        let inner = self.shared.lock_inner();
        self.shared.require_initialised(&inner)?;
        let settings = TunSettings::for_inbound(&inner.inbound()).with_profile(inner.profile);
        inner.tun.start(&settings).map_err(|source| {
            let error = ServiceError::from_tun_start(source);
            self.shared.report(&error);
            error
        })?;
        self.shared.log(LogLevel::Info, "TUN mode started");
        Ok(())
    }

    /// Stops the tunnel; a no-op when it is not running.
    pub fn stop_tun_mode(&self) -> Result<(), ServiceError> {
        let inner = self.shared.lock_inner();
        self.shared.require_initialised(&inner)?;
        inner.tun.stop().map_err(|source| {
            let error = ServiceError::Stop { source };
            self.shared.report(&error);
            error
        })?;
        self.shared.log(LogLevel::Info, "TUN mode stopped");
        Ok(())
    }

    /// Whether a tunnel process is alive.
    #[must_use]
    pub fn is_tun_mode_running(&self) -> bool {
        self.shared.lock_inner().tun.is_running()
    }

    /// Whether a core process is alive.
    #[must_use]
    pub fn is_core_running(&self) -> bool {
        self.shared.lock_inner().core.is_running()
    }

    /// Current settings with every default key present.
    #[must_use]
    pub fn current_config(&self) -> ConfigDocument {
        self.shared.lock_inner().effective()
    }

    /// Replaces the in-memory settings with the document at `path`.
    ///
    /// An empty path reloads the settings file of the initialised directory.
    /// On failure the current settings are left untouched.
    pub fn load_config(&self, path: impl AsRef<Path>) -> Result<(), ServiceError> {
        let path = path.as_ref();
        let mut inner = self.shared.lock_inner();
        self.shared.require_initialised(&inner)?;

        let loaded = if path.as_os_str().is_empty() {
            match inner.store.as_mut() {
                Some(store) => store.load().cloned(),
                None => return Err(ServiceError::NotInitialised),
            }
        } else {
            read_document(path)
        };
        let document = loaded.map_err(|source| {
            let error = ServiceError::from_document_load(source);
            self.shared.report(&error);
            error
        })?;

        info!(
            target: SERVICE_TARGET,
            file = %path.display(),
            keys = document.len(),
            "configuration loaded"
        );
        inner.current = document;
        Ok(())
    }

    /// Persists the in-memory settings to the settings file.
    pub fn save_config(&self) -> Result<(), ServiceError> {
        let mut inner = self.shared.lock_inner();
        self.shared.require_initialised(&inner)?;
        self.shared.persist(&mut inner)
    }

    /// Sets one settings key in memory; call [`Self::save_config`] to persist.
    ///
    /// Clears any session override of the same key.
    pub fn set_config_value(&self, key: &str, value: Value) -> Result<(), ServiceError> {
        let mut inner = self.shared.lock_inner();
        self.shared.require_initialised(&inner)?;
        debug!(target: SERVICE_TARGET, key, %value, "configuration value set");
        inner.overrides.remove(key);
        inner.current.insert(key.to_owned(), value);
        Ok(())
    }

    /// Overrides one settings key for the lifetime of this orchestrator.
    ///
    /// The override shapes the effective settings used by starts, accessors
    /// and [`Self::current_config`], but is never written to the settings
    /// file.
    pub fn override_config_value(&self, key: &str, value: Value) -> Result<(), ServiceError> {
        let mut inner = self.shared.lock_inner();
        self.shared.require_initialised(&inner)?;
        debug!(target: SERVICE_TARGET, key, %value, "session override set");
        inner.overrides.insert(key.to_owned(), value);
        Ok(())
    }

    /// Address of the SOCKS5 inbound.
    #[must_use]
    pub fn socks_address(&self) -> String {
        self.shared.lock_inner().inbound().address
    }

    /// Port of the SOCKS5 inbound.
    #[must_use]
    pub fn socks_port(&self) -> u16 {
        self.shared.lock_inner().inbound().socks_port
    }

    /// Address of the HTTP inbound.
    #[must_use]
    pub fn http_address(&self) -> String {
        self.shared.lock_inner().inbound().address
    }

    /// Port of the HTTP inbound.
    #[must_use]
    pub fn http_port(&self) -> u16 {
        self.shared.lock_inner().inbound().http_port
    }

    /// Uploaded bytes since the last reset.
    #[must_use]
    pub fn upload_bytes(&self) -> u64 {
        self.shared.traffic.upload()
    }

    /// Downloaded bytes since the last reset.
    #[must_use]
    pub fn download_bytes(&self) -> u64 {
        self.shared.traffic.download()
    }

    /// Zeroes the traffic counters and rebases the probe.
    ///
    /// The sampler is paused for the duration, so a sample taken before the
    /// reset can never land after it.
    pub fn reset_traffic(&self) {
        let mut inner = self.shared.lock_inner();
        let resume = inner.sampler.is_some();
        inner.stop_sampler();
        self.shared.traffic.reset();
        self.shared.probe.rebase();
        if resume {
            self.shared.start_sampler(&mut inner);
        }
        drop(inner);
        info!(target: SERVICE_TARGET, "traffic counters reset");
        self.shared.events.publish(ServiceEvent::TrafficUpdated {
            upload: 0,
            download: 0,
        });
    }

    /// Profile selected by the last successful `load_profile`.
    #[must_use]
    pub fn current_profile_id(&self) -> Option<ProfileId> {
        self.shared.lock_inner().profile
    }

    /// Current lifecycle state; never waits on a lifecycle operation.
    #[must_use]
    pub fn status(&self) -> ServiceState {
        self.shared.status()
    }

    /// Attaches a new event subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ServiceEvent> {
        self.shared.events.subscribe()
    }

    /// Event bus shared with the supervisors.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Stops every subprocess, persists the settings, and settles in `Stopped`.
    ///
    /// Safe to call repeatedly; also runs when the orchestrator is dropped.
    pub fn shutdown(&self) -> Result<(), ServiceError> {
        let mut inner = self.shared.lock_inner();
        let mut outcome = Ok(());

        if self.shared.status() != ServiceState::Stopped || inner.tun.is_running() {
            inner.stop_sampler();
            let tun = inner.tun.stop();
            let core = inner.core.stop();
            inner.core_run = None;
            if let Err(source) = tun.and(core) {
                outcome = Err(ServiceError::Stop { source });
            }
        }
        if inner.store.is_some()
            && let Err(error) = self.shared.persist(&mut inner)
            && outcome.is_ok()
        {
            outcome = Err(error);
        }

        self.shared.set_status(ServiceState::Stopped);
        match &outcome {
            Ok(()) => info!(target: SERVICE_TARGET, "service shut down"),
            Err(error) => self.shared.report(error),
        }
        outcome
    }
}

impl Drop for ServiceOrchestrator {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            warn!(target: SERVICE_TARGET, %error, "shutdown during drop failed");
        }
    }
}

impl Shared {
    fn lock_inner(&self) -> MutexGuard<'_, ServiceInner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn status(&self) -> ServiceState {
        *self.status.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn set_status(&self, next: ServiceState) {
        {
            let mut status = self.status.lock().unwrap_or_else(|poison| poison.into_inner());
            if *status == next {
                return;
            }
            *status = next;
        }
        debug!(target: SERVICE_TARGET, status = %next, "Service status changed to: {next}");
        self.events.publish(ServiceEvent::StatusChanged(next));
    }

    fn report(&self, error: &ServiceError) {
        error!(target: SERVICE_TARGET, %error, "service operation failed");
        self.events.publish(ServiceEvent::Error(error.to_string()));
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!(target: SERVICE_TARGET, "{message}"),
            LogLevel::Info => info!(target: SERVICE_TARGET, "{message}"),
            LogLevel::Warn => warn!(target: SERVICE_TARGET, "{message}"),
            LogLevel::Error => error!(target: SERVICE_TARGET, "{message}"),
        }
        self.events.publish(ServiceEvent::Log {
            level,
            message: message.to_owned(),
        });
    }

    fn require_initialised(&self, inner: &ServiceInner) -> Result<(), ServiceError> {
        if inner.store.is_some() {
            return Ok(());
        }
        let error = ServiceError::NotInitialised;
        self.report(&error);
        Err(error)
    }

    fn persist(&self, inner: &mut ServiceInner) -> Result<(), ServiceError> {
        let document = inner.current.clone();
        let Some(store) = inner.store.as_mut() else {
            return Err(ServiceError::NotInitialised);
        };
        store.replace(document);
        store.save().map_err(|source| {
            let error = ServiceError::Store { source };
            self.report(&error);
            error
        })
    }

    fn start_locked(&self, inner: &mut ServiceInner) -> Result<(), ServiceError> {
        if self.status() == ServiceState::Running {
            debug!(target: SERVICE_TARGET, "proxy already running");
            return Ok(());
        }
        let Some(profile) = inner.profile else {
            let error = ServiceError::NoProfileSelected;
            self.report(&error);
            return Err(error);
        };

        self.set_status(ServiceState::Starting);
        let effective = inner.effective();
        let inbound = InboundSettings::from_document(&effective);
        match inner.core.start(profile, &inbound) {
            Ok(run_id) => inner.core_run = Some(run_id),
            Err(source) => {
                inner.core_run = None;
                self.set_status(ServiceState::Error);
                let error = ServiceError::from_core_start(source);
                self.report(&error);
                return Err(error);
            }
        }

        if tun_requested(&effective)
            && let Err(source) = inner
                .tun
                .start(&TunSettings::for_inbound(&inbound).with_profile(Some(profile)))
        {
            warn!(target: SERVICE_TARGET, error = %source, "tunnel start failed");
            self.log(
                LogLevel::Warn,
                "Failed to start TUN mode, continuing without TUN",
            );
        }

        self.start_sampler(inner);
        self.set_status(ServiceState::Running);
        info!(
            target: SERVICE_TARGET,
            profile = %profile,
            address = %inbound.address,
            socks_port = inbound.socks_port,
            http_port = inbound.http_port,
            "proxy listening"
        );
        self.log(LogLevel::Info, "Proxy started successfully");
        Ok(())
    }

    fn stop_locked(&self, inner: &mut ServiceInner) -> Result<(), ServiceError> {
        if self.status() == ServiceState::Stopped {
            debug!(target: SERVICE_TARGET, "proxy already stopped");
            return Ok(());
        }

        self.set_status(ServiceState::Stopping);
        inner.stop_sampler();
        let tun = inner.tun.stop();
        let core = inner.core.stop();
        inner.core_run = None;

        match tun.and(core) {
            Ok(()) => {
                self.set_status(ServiceState::Stopped);
                self.log(LogLevel::Info, "Proxy stopped successfully");
                Ok(())
            }
            Err(source) => {
                self.set_status(ServiceState::Error);
                let error = ServiceError::Stop { source };
                self.report(&error);
                Err(error)
            }
        }
    }

    fn start_sampler(&self, inner: &mut ServiceInner) {
        if inner.sampler.is_some() {
            return;
        }
        match TrafficSampler::spawn(
            self.sample_interval,
            Arc::clone(&self.probe),
            Arc::clone(&self.traffic),
            self.events.clone(),
        ) {
            Ok(sampler) => inner.sampler = Some(sampler),
            Err(error) => {
                warn!(target: SERVICE_TARGET, %error, "traffic sampler unavailable");
            }
        }
    }

    fn on_core_exit(&self, report: ExitReport) {
        let mut inner = self.lock_inner();
        if inner.core_run != Some(report.run_id) || self.status() != ServiceState::Running {
            debug!(
                target: SERVICE_TARGET,
                run_id = report.run_id,
                "ignoring exit of a core run that is no longer current"
            );
            return;
        }
        inner.stop_sampler();
        inner.core_run = None;
        self.set_status(ServiceState::Error);
        self.report(&ServiceError::UnexpectedExit {
            status: report.describe_status(),
        });
    }

    fn on_tun_exit(&self, report: ExitReport) {
        warn!(
            target: SERVICE_TARGET,
            pid = report.pid,
            status = ?report.describe_status(),
            "TUN process finished"
        );
        self.events.publish(ServiceEvent::Log {
            level: LogLevel::Warn,
            message: "TUN process finished".to_owned(),
        });
    }
}

fn exit_hook(weak: &Weak<Shared>, handler: fn(&Shared, ExitReport)) -> ExitHook {
    let weak = weak.clone();
    Arc::new(move |report| {
        if let Some(shared) = weak.upgrade() {
            handler(&shared, report);
        }
    })
}

fn tun_requested(document: &ConfigDocument) -> bool {
    document_bool(document, keys::SPMODE_VPN).unwrap_or(false)
        && document_bool(document, keys::VPN_INTERNAL_TUN).unwrap_or(true)
}

fn bootstrap(
    dir: &Path,
    defaults: &ConfigDocument,
) -> Result<(ConfigStore, ConfigDocument), StoreError> {
    for sub in [PROFILES_DIR, GROUPS_DIR, ROUTES_DIR] {
        let path = dir.join(sub);
        fs::create_dir_all(&path).map_err(|source| StoreError::Directory { path, source })?;
    }
    let mut store = ConfigStore::initialize(dir)?;
    let merged = merge_with_defaults(store.load()?, defaults);
    store.replace(merged.clone());
    store.save()?;
    Ok((store, merged))
}
