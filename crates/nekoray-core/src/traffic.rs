//! Traffic counters and the periodic sampler feeding them.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};
use tracing::{debug, warn};

use crate::events::{EventBus, ServiceEvent};

const TRAFFIC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::traffic");

/// Interval between traffic samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(1000);

/// Cumulative byte totals reported by a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficTotals {
    /// Uploaded bytes.
    pub upload: u64,
    /// Downloaded bytes.
    pub download: u64,
}

/// Source of cumulative traffic totals for the running core.
#[cfg_attr(test, mockall::automock)]
pub trait TrafficProbe: Send + Sync {
    /// Totals since the last rebase.
    fn totals(&self) -> TrafficTotals;

    /// Starts counting from zero again.
    fn rebase(&self) {}
}

/// Probe for cores that expose no statistics; always reports zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTrafficProbe;

impl TrafficProbe for NullTrafficProbe {
    fn totals(&self) -> TrafficTotals {
        TrafficTotals::default()
    }
}

/// Upload and download counters that only move forward between resets.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    upload: AtomicU64,
    download: AtomicU64,
}

impl TrafficCounters {
    /// Records a sample; totals lower than the current value are ignored.
    pub fn record(&self, totals: TrafficTotals) {
        self.upload.fetch_max(totals.upload, Ordering::AcqRel);
        self.download.fetch_max(totals.download, Ordering::AcqRel);
    }

    /// Zeroes both counters.
    pub fn reset(&self) {
        self.upload.store(0, Ordering::Release);
        self.download.store(0, Ordering::Release);
    }

    /// Uploaded bytes.
    #[must_use]
    pub fn upload(&self) -> u64 {
        self.upload.load(Ordering::Acquire)
    }

    /// Downloaded bytes.
    #[must_use]
    pub fn download(&self) -> u64 {
        self.download.load(Ordering::Acquire)
    }

    /// Both counters as a single snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TrafficTotals {
        TrafficTotals {
            upload: self.upload(),
            download: self.download(),
        }
    }
}

/// Background thread sampling a probe on a fixed interval.
///
/// [`TrafficSampler::stop`] joins the thread, so no sample is taken after it
/// returns.
#[derive(Debug)]
pub struct TrafficSampler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TrafficSampler {
    /// Spawns the sampling thread.
    pub fn spawn(
        interval: Duration,
        probe: Arc<dyn TrafficProbe>,
        counters: Arc<TrafficCounters>,
        events: EventBus,
    ) -> io::Result<Self> {
        let (stop, stopped) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("nekoray-traffic".to_owned())
            .spawn(move || {
                debug!(target: TRAFFIC_TARGET, ?interval, "traffic sampler started");
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => sample(probe.as_ref(), &counters, &events),
                    }
                }
                debug!(target: TRAFFIC_TARGET, "traffic sampler stopped");
            })?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the channel and wakes the select.
        drop(self.stop.take());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!(target: TRAFFIC_TARGET, "traffic sampler panicked");
        }
    }
}

impl Drop for TrafficSampler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sample(probe: &dyn TrafficProbe, counters: &TrafficCounters, events: &EventBus) {
    counters.record(probe.totals());
    let TrafficTotals { upload, download } = counters.snapshot();
    events.publish(ServiceEvent::TrafficUpdated { upload, download });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[test]
    fn counters_never_move_backwards() {
        let counters = TrafficCounters::default();
        counters.record(TrafficTotals {
            upload: 10,
            download: 20,
        });
        counters.record(TrafficTotals {
            upload: 5,
            download: 25,
        });

        assert_eq!(counters.upload(), 10);
        assert_eq!(counters.download(), 25);

        counters.reset();
        assert_eq!(counters.snapshot(), TrafficTotals::default());
    }

    #[test]
    fn sampler_publishes_probe_totals() {
        let mut probe = MockTrafficProbe::new();
        probe.expect_totals().returning(|| TrafficTotals {
            upload: 512,
            download: 2048,
        });
        let counters = Arc::new(TrafficCounters::default());
        let events = EventBus::new();
        let receiver = events.subscribe();

        let sampler = TrafficSampler::spawn(
            Duration::from_millis(20),
            Arc::new(probe),
            Arc::clone(&counters),
            events,
        )
        .expect("spawn sampler");
        let event = receiver
            .recv_timeout(Duration::from_secs(2))
            .expect("traffic event");
        sampler.stop();

        assert_eq!(
            event,
            ServiceEvent::TrafficUpdated {
                upload: 512,
                download: 2048,
            }
        );
        assert_eq!(counters.upload(), 512);
    }

    #[test]
    fn no_samples_after_stop_returns() {
        struct FlagProbe(Arc<AtomicBool>);

        impl TrafficProbe for FlagProbe {
            fn totals(&self) -> TrafficTotals {
                assert!(
                    !self.0.load(Ordering::SeqCst),
                    "sampled after the sampler was stopped"
                );
                TrafficTotals::default()
            }
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let sampler = TrafficSampler::spawn(
            Duration::from_millis(5),
            Arc::new(FlagProbe(Arc::clone(&stopped))),
            Arc::new(TrafficCounters::default()),
            EventBus::new(),
        )
        .expect("spawn sampler");
        thread::sleep(Duration::from_millis(30));

        sampler.stop();
        stopped.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
    }
}
