//! Ring buffer of recent service log lines served by `GET /api/logs`.
//!
//! A collector thread drains an [`EventBus`] subscription and records every
//! event that renders as a log entry. The thread exits once the bus and all
//! its publishers are gone.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use nekoray_core::{EventBus, LogLevel};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

const LOGS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::logs");

/// Entries retained before the oldest is evicted.
pub const LOG_CAPACITY: usize = 1000;

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// RFC 3339 capture time.
    pub timestamp: String,
    /// Severity.
    pub level: LogLevel,
    /// Rendered message.
    pub message: String,
}

/// Bounded, shareable history of log entries.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl LogBuffer {
    /// Creates an empty buffer retaining at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Subscribes to `events` and records log entries on a background thread.
    pub fn attach(events: &EventBus, capacity: usize) -> io::Result<Self> {
        let buffer = Self::with_capacity(capacity);
        let receiver = events.subscribe();
        let sink = buffer.clone();
        thread::Builder::new()
            .name("nekorayd-logs".to_owned())
            .spawn(move || {
                for event in receiver {
                    if let Some((level, message)) = event.log_entry() {
                        sink.record(level, message);
                    }
                }
                debug!(target: LOGS_TARGET, "event bus closed; log collector exiting");
            })?;
        Ok(buffer)
    }

    /// Appends an entry stamped with the current time.
    pub fn record(&self, level: LogLevel, message: impl Into<String>) {
        let now = OffsetDateTime::now_utc();
        let timestamp = now
            .format(&Rfc3339)
            .unwrap_or_else(|_| now.unix_timestamp().to_string());
        let mut entries = self.lock();
        if self.capacity == 0 {
            return;
        }
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp,
            level,
            message: message.into(),
        });
    }

    /// Copies the retained entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use nekoray_core::ServiceEvent;
    use rstest::rstest;

    use super::*;

    fn wait_for_entries(buffer: &LogBuffer, count: usize) -> Vec<LogEntry> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let entries = buffer.snapshot();
            if entries.len() >= count || Instant::now() >= deadline {
                return entries;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[rstest]
    #[case(3, 5)]
    #[case(1000, 1001)]
    fn evicts_oldest_entries(#[case] capacity: usize, #[case] written: usize) {
        let buffer = LogBuffer::with_capacity(capacity);
        for index in 0..written {
            buffer.record(LogLevel::Info, format!("line {index}"));
        }
        let entries = buffer.snapshot();
        assert_eq!(entries.len(), capacity);
        assert_eq!(
            entries.first().map(|entry| entry.message.as_str()),
            Some(format!("line {}", written - capacity).as_str())
        );
        assert_eq!(
            entries.last().map(|entry| entry.message.as_str()),
            Some(format!("line {}", written - 1).as_str())
        );
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let buffer = LogBuffer::with_capacity(1);
        buffer.record(LogLevel::Warn, "disk nearly full");
        let entry = buffer.snapshot().pop().expect("entry recorded");
        OffsetDateTime::parse(&entry.timestamp, &Rfc3339).expect("timestamp parses");
        assert_eq!(entry.level, LogLevel::Warn);
    }

    #[test]
    fn collects_log_events_from_the_bus() {
        let bus = EventBus::new();
        let buffer = LogBuffer::attach(&bus, LOG_CAPACITY).expect("attach collector");

        bus.publish(ServiceEvent::TrafficUpdated {
            upload: 1,
            download: 2,
        });
        bus.publish(ServiceEvent::Log {
            level: LogLevel::Info,
            message: "Proxy started successfully".to_owned(),
        });
        bus.publish(ServiceEvent::Error("No profile selected".to_owned()));

        let entries = wait_for_entries(&buffer, 2);
        let rendered: Vec<_> = entries
            .iter()
            .map(|entry| (entry.level, entry.message.as_str()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                (LogLevel::Info, "Proxy started successfully"),
                (LogLevel::Error, "No profile selected"),
            ]
        );
    }
}
