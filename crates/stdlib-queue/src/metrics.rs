//! Bounded-memory rolling windows and read-only metric snapshots.
//!
//! Arrival/processing rate and latency statistics are ring buffers with a
//! fixed capacity; eviction of expired samples is lazy (done on read), so
//! the observed value converges to the true windowed mean within one
//! sample, per the documented window contract ("within ±1 sample of the
//! nominal window").

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A bounded ring buffer of timestamped samples used for rate and latency
/// windows.
pub struct RollingWindow {
    capacity: usize,
    window: Duration,
    samples: VecDeque<(Instant, f64)>,
}

impl RollingWindow {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            samples: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Record a new sample at `now`, evicting samples older than the window
    /// and trimming to capacity.
    pub fn record(&mut self, now: Instant, value: f64) {
        self.samples.push_back((now, value));
        self.evict(now);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(t, _)) = self.samples.front() {
            if now.saturating_duration_since(t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Mean of all samples currently within the window, as of `now`.
    pub fn mean(&mut self, now: Instant) -> f64 {
        self.evict(now);
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|(_, v)| v).sum();
        sum / self.samples.len() as f64
    }

    /// Count of samples currently within the window, as of `now`.
    pub fn count(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.samples.len()
    }
}

/// Per-queue backpressure counters, cloned out as an atomic point-in-time
/// snapshot so readers never observe torn counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackpressureCounters {
    pub blocked: u64,
    pub rejected: u64,
    pub throttled: u64,
    pub redirected: u64,
}
