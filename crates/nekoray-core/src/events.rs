//! Service events and their fan-out to attached observers.
//!
//! The orchestrator and both supervisors publish [`ServiceEvent`] values on a
//! shared [`EventBus`]. Each subscriber owns a bounded queue; when a queue is
//! full the newest event is dropped for that subscriber and counted, so a slow
//! consumer can never stall a lifecycle operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::Serialize;
use strum::Display;

use crate::state::{ProfileId, ServiceState};

const EVENTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::events");

/// Queue depth allotted to each subscriber.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Which supervised process produced an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutputSource {
    /// The proxy core.
    Core,
    /// The privileged tunnel process.
    Tun,
}

/// Standard stream an output line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Severity attached to log-style events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Degraded but continuing.
    Warn,
    /// Operation failed.
    Error,
}

/// Notifications emitted by the service layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// The service moved to a new state.
    StatusChanged(ServiceState),
    /// A new profile was selected.
    ProfileChanged(ProfileId),
    /// Fresh traffic totals were sampled.
    TrafficUpdated {
        /// Uploaded bytes.
        upload: u64,
        /// Downloaded bytes.
        download: u64,
    },
    /// An operation failed.
    Error(String),
    /// Informational message from the service itself.
    Log {
        /// Severity of the message.
        level: LogLevel,
        /// Rendered message.
        message: String,
    },
    /// A line captured from a supervised process.
    ProcessOutput {
        /// Process that wrote the line.
        source: OutputSource,
        /// Stream the line was read from.
        stream: OutputStream,
        /// Line content without trailing whitespace.
        line: String,
    },
}

impl ServiceEvent {
    /// Renders the event as a log entry, when it carries a message.
    ///
    /// Process output is prefixed so core and tunnel diagnostics remain
    /// distinguishable once flattened into a single log.
    #[must_use]
    pub fn log_entry(&self) -> Option<(LogLevel, String)> {
        match self {
            Self::Error(message) => Some((LogLevel::Error, message.clone())),
            Self::Log { level, message } => Some((*level, message.clone())),
            Self::ProcessOutput {
                source,
                stream,
                line,
            } => {
                let (level, prefix) = match (source, stream) {
                    (OutputSource::Core, OutputStream::Stdout) => (LogLevel::Info, ""),
                    (OutputSource::Core, OutputStream::Stderr) => (LogLevel::Warn, "[ERROR] "),
                    (OutputSource::Tun, OutputStream::Stdout) => (LogLevel::Info, "[TUN] "),
                    (OutputSource::Tun, OutputStream::Stderr) => (LogLevel::Warn, "[TUN ERROR] "),
                };
                Some((level, format!("{prefix}{line}")))
            }
            Self::StatusChanged(state) => {
                Some((LogLevel::Debug, format!("Service status changed to: {state}")))
            }
            Self::ProfileChanged(_) | Self::TrafficUpdated { .. } => None,
        }
    }
}

/// Fan-out channel shared by the orchestrator and supervisors.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug, Default)]
struct BusInner {
    subscribers: Mutex<Vec<Sender<ServiceEvent>>>,
    dropped: AtomicU64,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a subscriber with the default queue depth.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ServiceEvent> {
        self.subscribe_with_capacity(EVENT_QUEUE_CAPACITY)
    }

    /// Attaches a subscriber with an explicit queue depth.
    #[must_use]
    pub fn subscribe_with_capacity(&self, capacity: usize) -> Receiver<ServiceEvent> {
        let (sender, receiver) = bounded(capacity);
        self.subscribers().push(sender);
        receiver
    }

    /// Delivers an event to every live subscriber without blocking.
    pub fn publish(&self, event: ServiceEvent) {
        tracing::trace!(target: EVENTS_TARGET, ?event, "publishing event");
        let mut subscribers = self.subscribers();
        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Number of events discarded because a subscriber queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Sender<ServiceEvent>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
