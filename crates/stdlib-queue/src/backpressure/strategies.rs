//! Built-in backpressure strategies from the documented strategy table.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::metrics::RollingWindow;

use super::{Action, QueueTelemetry, Strategy, RELEASE_FACTOR};

/// Triggers when `ready > threshold`. Default action: reject.
pub struct SizeBased {
    pub threshold: usize,
    pub action: Action,
}

impl SizeBased {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            action: Action::Reject,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }
}

impl Strategy for SizeBased {
    fn name(&self) -> &'static str {
        "size_based"
    }

    fn should_trigger(&self, telemetry: &QueueTelemetry) -> bool {
        telemetry.counts.ready > self.threshold
    }

    fn apply(&self, _telemetry: &QueueTelemetry) -> Action {
        self.action.clone()
    }

    fn should_release(&self, telemetry: &QueueTelemetry) -> bool {
        (telemetry.counts.ready as f64) <= RELEASE_FACTOR * self.threshold as f64
    }
}

/// Triggers when `in_flight / (ready + in_flight) > p`. Default action: block.
pub struct Utilization {
    pub p: f64,
    pub action: Action,
}

impl Utilization {
    pub fn new(p: f64) -> Self {
        Self {
            p,
            action: Action::Block {
                timeout: Duration::ZERO,
            },
        }
    }

    fn utilization(telemetry: &QueueTelemetry) -> f64 {
        let denom = telemetry.counts.ready + telemetry.counts.in_flight;
        if denom == 0 {
            0.0
        } else {
            telemetry.counts.in_flight as f64 / denom as f64
        }
    }
}

impl Strategy for Utilization {
    fn name(&self) -> &'static str {
        "utilization"
    }

    fn should_trigger(&self, telemetry: &QueueTelemetry) -> bool {
        Self::utilization(telemetry) > self.p
    }

    fn apply(&self, _telemetry: &QueueTelemetry) -> Action {
        self.action.clone()
    }

    fn should_release(&self, telemetry: &QueueTelemetry) -> bool {
        Self::utilization(telemetry) <= RELEASE_FACTOR * self.p
    }
}

/// Triggers when `arrival_rate / processing_rate > k` over a rolling 60s
/// window. Default action: throttle.
pub struct RateBased {
    pub k: f64,
    pub action: Action,
    arrivals: Mutex<RollingWindow>,
    completions: Mutex<RollingWindow>,
}

impl RateBased {
    pub fn new(k: f64) -> Self {
        let window = Duration::from_secs(60);
        Self {
            k,
            action: Action::Throttle {
                delay: Duration::from_millis(50),
            },
            arrivals: Mutex::new(RollingWindow::new(4096, window)),
            completions: Mutex::new(RollingWindow::new(4096, window)),
        }
    }

    fn rates(&self, now: Instant) -> (f64, f64) {
        let window_secs = 60.0;
        let arrivals = self.arrivals.lock().unwrap().count(now) as f64 / window_secs;
        let completions = self.completions.lock().unwrap().count(now) as f64 / window_secs;
        (arrivals, completions)
    }
}

impl Strategy for RateBased {
    fn name(&self) -> &'static str {
        "rate_based"
    }

    fn should_trigger(&self, telemetry: &QueueTelemetry) -> bool {
        let (arrival_rate, processing_rate) = self.rates(telemetry.now);
        if processing_rate == 0.0 {
            arrival_rate > 0.0
        } else {
            arrival_rate / processing_rate > self.k
        }
    }

    fn apply(&self, _telemetry: &QueueTelemetry) -> Action {
        self.action.clone()
    }

    fn should_release(&self, telemetry: &QueueTelemetry) -> bool {
        let (arrival_rate, processing_rate) = self.rates(telemetry.now);
        if processing_rate == 0.0 {
            arrival_rate == 0.0
        } else {
            arrival_rate / processing_rate <= RELEASE_FACTOR * self.k
        }
    }

    fn record_arrival(&self, now: Instant) {
        self.arrivals.lock().unwrap().record(now, 1.0);
    }

    fn record_completion(&self, now: Instant, _latency: Duration) {
        self.completions.lock().unwrap().record(now, 1.0);
    }
}

/// Triggers when the rolling-mean processing latency over the last 100
/// samples exceeds `threshold`. Default action: reject.
pub struct LatencyBased {
    pub threshold: Duration,
    pub action: Action,
    samples: Mutex<RollingWindow>,
}

impl LatencyBased {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            action: Action::Reject,
            samples: Mutex::new(RollingWindow::new(100, Duration::from_secs(3600))),
        }
    }

    fn mean_ms(&self, now: Instant) -> f64 {
        self.samples.lock().unwrap().mean(now)
    }
}

impl Strategy for LatencyBased {
    fn name(&self) -> &'static str {
        "latency_based"
    }

    fn should_trigger(&self, telemetry: &QueueTelemetry) -> bool {
        self.mean_ms(telemetry.now) > self.threshold.as_secs_f64() * 1000.0
    }

    fn apply(&self, _telemetry: &QueueTelemetry) -> Action {
        self.action.clone()
    }

    fn should_release(&self, telemetry: &QueueTelemetry) -> bool {
        self.mean_ms(telemetry.now) <= RELEASE_FACTOR * self.threshold.as_secs_f64() * 1000.0
    }

    fn record_completion(&self, now: Instant, latency: Duration) {
        self.samples.lock().unwrap().record(now, latency.as_secs_f64() * 1000.0);
    }
}

/// Triggers if any member strategy triggers; applies the first triggered
/// member's action; releases only once every member releases.
pub struct Composite {
    members: Vec<Box<dyn Strategy>>,
}

impl Composite {
    pub fn new(members: Vec<Box<dyn Strategy>>) -> Self {
        Self { members }
    }
}

impl Strategy for Composite {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn should_trigger(&self, telemetry: &QueueTelemetry) -> bool {
        self.members.iter().any(|m| m.should_trigger(telemetry))
    }

    fn apply(&self, telemetry: &QueueTelemetry) -> Action {
        self.members
            .iter()
            .find(|m| m.should_trigger(telemetry))
            .map(|m| m.apply(telemetry))
            .unwrap_or(Action::Admit)
    }

    fn should_release(&self, telemetry: &QueueTelemetry) -> bool {
        self.members.iter().all(|m| m.should_release(telemetry))
    }

    fn record_arrival(&self, now: Instant) {
        for m in &self.members {
            m.record_arrival(now);
        }
    }

    fn record_completion(&self, now: Instant, latency: Duration) {
        for m in &self.members {
            m.record_completion(now, latency);
        }
    }
}

/// Triggers when `ready > adaptive_threshold`, where the threshold is
/// continuously adjusted toward `rolling_mean(ready) * (1 + alpha)`, clamped
/// to `[0.5 * base, 2 * base]` to bound pathological drift. Default action:
/// block.
pub struct Adaptive {
    base: f64,
    alpha: f64,
    action: Action,
    history: Mutex<RollingWindow>,
    current_threshold: Mutex<f64>,
}

impl Adaptive {
    pub fn new(base_threshold: usize, alpha: f64) -> Self {
        let base = base_threshold as f64;
        Self {
            base,
            alpha,
            action: Action::Block {
                timeout: Duration::ZERO,
            },
            history: Mutex::new(RollingWindow::new(1000, Duration::from_secs(3600))),
            current_threshold: Mutex::new(base),
        }
    }

    fn refresh_threshold(&self, telemetry: &QueueTelemetry) -> f64 {
        let mean = {
            let mut history = self.history.lock().unwrap();
            history.record(telemetry.now, telemetry.counts.ready as f64);
            history.mean(telemetry.now)
        };
        let target = (mean * (1.0 + self.alpha)).clamp(0.5 * self.base, 2.0 * self.base);
        *self.current_threshold.lock().unwrap() = target;
        target
    }
}

impl Strategy for Adaptive {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn should_trigger(&self, telemetry: &QueueTelemetry) -> bool {
        let threshold = self.refresh_threshold(telemetry);
        telemetry.counts.ready as f64 > threshold
    }

    fn apply(&self, _telemetry: &QueueTelemetry) -> Action {
        self.action.clone()
    }

    fn should_release(&self, telemetry: &QueueTelemetry) -> bool {
        let threshold = *self.current_threshold.lock().unwrap();
        telemetry.counts.ready as f64 <= RELEASE_FACTOR * threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueCounts;

    fn telemetry(ready: usize, in_flight: usize) -> QueueTelemetry {
        QueueTelemetry {
            counts: QueueCounts {
                ready,
                in_flight,
                delayed: 0,
                capacity: None,
            },
            now: Instant::now(),
        }
    }

    #[test]
    fn size_based_trigger_and_release() {
        let s = SizeBased::new(100);
        assert!(!s.should_trigger(&telemetry(100, 0)));
        assert!(s.should_trigger(&telemetry(101, 0)));
        assert!(s.should_release(&telemetry(80, 0)));
        assert!(!s.should_release(&telemetry(81, 0)));
    }

    #[test]
    fn utilization_ignores_empty_queue() {
        let s = Utilization::new(0.5);
        assert!(!s.should_trigger(&telemetry(0, 0)));
    }

    #[test]
    fn composite_triggers_on_any_member() {
        let c = Composite::new(vec![
            Box::new(SizeBased::new(1000)),
            Box::new(Utilization::new(0.1)),
        ]);
        assert!(c.should_trigger(&telemetry(0, 5)));
    }
}
