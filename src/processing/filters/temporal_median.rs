use super::NoiseFilter;
use crate::events::{Event, EventBatch, Resolution};

/// Longest per-pixel interval history the filter keeps.
pub const MAX_MEDIAN_WINDOW: usize = 15;

const NEVER: i64 = i64::MIN;

/// Temporal median filter.
///
/// Each pixel keeps its last `window` inter-event intervals. Once the history
/// is full, an event is dropped when the median interval is below
/// `min_interval_us`: the pixel is firing faster than real scene changes do.
/// A single short gap does not move the median, so bursts on genuine edges
/// survive.
pub struct TemporalMedianSuppressor {
    resolution: Resolution,
    window: usize,
    min_interval_us: i64,
    last_timestamp: Vec<i64>,
    intervals: Vec<i64>,
    filled: Vec<u8>,
    cursor: Vec<u8>,
}

impl TemporalMedianSuppressor {
    pub fn new(resolution: Resolution, window: usize, min_interval_us: i64) -> Self {
        let window = window.clamp(1, MAX_MEDIAN_WINDOW);
        let n = resolution.pixel_count();
        Self {
            resolution,
            window,
            min_interval_us,
            last_timestamp: vec![NEVER; n],
            intervals: vec![0; n * window],
            filled: vec![0; n],
            cursor: vec![0; n],
        }
    }

    fn median_interval(&self, idx: usize) -> i64 {
        let ring = &self.intervals[idx * self.window..(idx + 1) * self.window];
        let mut sorted = [0i64; MAX_MEDIAN_WINDOW];
        let sorted = &mut sorted[..self.window];
        sorted.copy_from_slice(ring);
        sorted.sort_unstable();
        sorted[self.window / 2]
    }

    fn accept(&mut self, event: Event) -> bool {
        if !self.resolution.contains(event.x, event.y) {
            return false;
        }

        let idx = self.resolution.index(event.x, event.y);
        let last = std::mem::replace(&mut self.last_timestamp[idx], event.timestamp);
        if last == NEVER {
            return true;
        }

        let slot = self.cursor[idx] as usize;
        self.intervals[idx * self.window + slot] = event.timestamp.saturating_sub(last);
        self.cursor[idx] = ((slot + 1) % self.window) as u8;
        if (self.filled[idx] as usize) < self.window {
            self.filled[idx] += 1;
            if (self.filled[idx] as usize) < self.window {
                return true;
            }
        }

        self.median_interval(idx) >= self.min_interval_us
    }
}

impl NoiseFilter for TemporalMedianSuppressor {
    fn name(&self) -> &'static str {
        "temporal_median"
    }

    fn process(&mut self, mut batch: EventBatch) -> EventBatch {
        batch.retain(|event| self.accept(event));
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train(x: u16, y: u16, start: i64, step: i64, count: i64) -> EventBatch {
        (0..count).map(|i| Event::new(start + i * step, x, y, i % 2 == 0)).collect()
    }

    #[test]
    fn test_history_warmup_passes() {
        let mut filter = TemporalMedianSuppressor::new(Resolution::new(8, 8), 3, 1_000);
        // First event plus two intervals: history not yet full.
        let out = filter.process(train(1, 1, 0, 10, 3));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_flickering_pixel_suppressed() {
        let mut filter = TemporalMedianSuppressor::new(Resolution::new(8, 8), 3, 1_000);
        let out = filter.process(train(1, 1, 0, 10, 10));
        // Events 0..=2 pass during warmup, the rest have median 10us.
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_slow_pixel_passes() {
        let mut filter = TemporalMedianSuppressor::new(Resolution::new(8, 8), 3, 1_000);
        let out = filter.process(train(2, 2, 0, 5_000, 10));
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn test_single_short_gap_does_not_trip_median() {
        let mut filter = TemporalMedianSuppressor::new(Resolution::new(8, 8), 3, 1_000);
        filter.process(train(0, 0, 0, 5_000, 4));
        // Intervals now [5000, 5000, 5000]; one 50us gap gives median 5000.
        let out = filter.process(vec![Event::new(15_050, 0, 0, true)].into_iter().collect());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_pixels_are_independent() {
        let mut filter = TemporalMedianSuppressor::new(Resolution::new(8, 8), 3, 1_000);
        filter.process(train(1, 1, 0, 10, 10));
        let out = filter.process(vec![Event::new(200, 4, 4, true)].into_iter().collect());
        assert_eq!(out.len(), 1);
    }
}
