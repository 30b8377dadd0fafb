use std::time::{Duration, Instant};

/// Accumulates event counts and reports events/sec/sensor once per interval.
pub struct RateEstimator {
    interval: Duration,
    sensor_count: usize,
    accumulated: u64,
    last_tick: Instant,
}

impl RateEstimator {
    pub fn new(interval: Duration, sensor_count: usize, start: Instant) -> Self {
        Self {
            interval,
            sensor_count: sensor_count.max(1),
            accumulated: 0,
            last_tick: start,
        }
    }

    pub fn record(&mut self, n_events: usize) {
        self.accumulated += n_events as u64;
    }

    pub fn accumulated(&self) -> u64 {
        self.accumulated
    }

    /// Returns the rate and restarts the window when at least `interval` has
    /// passed since the previous reading; otherwise leaves everything as is.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_tick);
        if elapsed < self.interval {
            return None;
        }
        let rate = self.accumulated as f64 / (elapsed.as_secs_f64() * self.sensor_count as f64);
        self.accumulated = 0;
        self.last_tick = now;
        Some(rate)
    }
}
