use super::NoiseFilter;
use crate::config::{HotPixelConfig, HotPixelMode};
use crate::events::{Event, EventBatch, Resolution};

/// Hot pixel filter.
///
/// Counts events per pixel over a window of sensor time. When a window
/// closes, pixels whose count exceeds `rate_multiple` times the median count
/// of active pixels (and at least `min_events`) are flagged, and their events
/// are dropped from then on. In adaptive mode the flags are recomputed every
/// window; in permanent mode they only accumulate.
pub struct HotPixelSuppressor {
    resolution: Resolution,
    config: HotPixelConfig,
    counts: Vec<u32>,
    hot: Vec<bool>,
    window_start: Option<i64>,
    scratch: Vec<u32>,
}

impl HotPixelSuppressor {
    pub fn new(resolution: Resolution, config: HotPixelConfig) -> Self {
        let n = resolution.pixel_count();
        Self {
            resolution,
            config,
            counts: vec![0; n],
            hot: vec![false; n],
            window_start: None,
            scratch: Vec::with_capacity(n),
        }
    }

    pub fn hot_pixel_count(&self) -> usize {
        self.hot.iter().filter(|&&h| h).count()
    }

    pub fn is_hot(&self, x: u16, y: u16) -> bool {
        self.resolution.contains(x, y) && self.hot[self.resolution.index(x, y)]
    }

    fn close_window(&mut self) {
        self.scratch.clear();
        self.scratch.extend(self.counts.iter().copied().filter(|&c| c > 0));

        let median = if self.scratch.is_empty() {
            0.0
        } else {
            let mid = self.scratch.len() / 2;
            *self.scratch.select_nth_unstable(mid).1 as f64
        };
        let threshold = (median * self.config.rate_multiple).max(self.config.min_events as f64);

        for (count, hot) in self.counts.iter_mut().zip(self.hot.iter_mut()) {
            let over = *count as f64 > threshold;
            *hot = match self.config.mode {
                HotPixelMode::Adaptive => over,
                HotPixelMode::Permanent => *hot || over,
            };
            *count = 0;
        }
    }

    fn accept(&mut self, event: Event) -> bool {
        if !self.resolution.contains(event.x, event.y) {
            return false;
        }

        let start = *self.window_start.get_or_insert(event.timestamp);
        if event.timestamp.saturating_sub(start) >= self.config.window_us {
            self.close_window();
            self.window_start = Some(event.timestamp);
        }

        let idx = self.resolution.index(event.x, event.y);
        self.counts[idx] = self.counts[idx].saturating_add(1);
        !self.hot[idx]
    }
}

impl NoiseFilter for HotPixelSuppressor {
    fn name(&self) -> &'static str {
        "hot_pixel"
    }

    fn process(&mut self, mut batch: EventBatch) -> EventBatch {
        batch.retain(|event| self.accept(event));
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: HotPixelMode) -> HotPixelConfig {
        HotPixelConfig {
            enabled: true,
            window_us: 1_000_000,
            rate_multiple: 5.0,
            min_events: 10,
            mode,
        }
    }

    /// One window where (3, 3) fires 100 times and a handful of other pixels
    /// fire twice each.
    fn noisy_window(t0: i64) -> EventBatch {
        let mut events = Vec::new();
        for i in 0..100 {
            events.push(Event::new(t0 + i * 1_000, 3, 3, true));
        }
        for x in 0..6u16 {
            events.push(Event::new(t0 + 200_000 + x as i64, x, 0, true));
            events.push(Event::new(t0 + 300_000 + x as i64, x, 0, false));
        }
        events.sort_by_key(|e| e.timestamp);
        events.into_iter().collect()
    }

    #[test]
    fn test_normal_pixels_pass_first_window() {
        let mut filter = HotPixelSuppressor::new(Resolution::new(8, 8), config(HotPixelMode::Adaptive));
        let batch = noisy_window(0);
        let n = batch.len();
        assert_eq!(filter.process(batch).len(), n);
    }

    #[test]
    fn test_hot_pixel_flagged_after_window() {
        let mut filter = HotPixelSuppressor::new(Resolution::new(8, 8), config(HotPixelMode::Adaptive));
        filter.process(noisy_window(0));

        let next: EventBatch = vec![
            Event::new(1_100_000, 3, 3, true),
            Event::new(1_100_001, 1, 0, true),
        ]
        .into_iter()
        .collect();
        let out = filter.process(next);
        assert!(filter.is_hot(3, 3));
        assert_eq!(filter.hot_pixel_count(), 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0).map(|e| e.x), Some(1));
    }

    #[test]
    fn test_adaptive_pixel_recovers_permanent_does_not() {
        for (mode, still_hot) in [(HotPixelMode::Adaptive, false), (HotPixelMode::Permanent, true)] {
            let mut filter = HotPixelSuppressor::new(Resolution::new(8, 8), config(mode));
            filter.process(noisy_window(0));
            // Quiet second window, then a third event closes it.
            filter.process(vec![Event::new(1_000_000, 1, 1, true)].into_iter().collect());
            filter.process(vec![Event::new(2_000_000, 1, 1, true)].into_iter().collect());
            assert_eq!(filter.is_hot(3, 3), still_hot, "{:?}", mode);
        }
    }

    #[test]
    fn test_min_events_floor_protects_sparse_scene() {
        let mut filter = HotPixelSuppressor::new(Resolution::new(8, 8), config(HotPixelMode::Adaptive));
        let batch: EventBatch = (0..8)
            .map(|i| Event::new(i * 10, 2, 2, true))
            .chain(std::iter::once(Event::new(100, 5, 5, true)))
            .collect();
        filter.process(batch);
        filter.process(vec![Event::new(1_000_100, 0, 0, true)].into_iter().collect());
        assert_eq!(filter.hot_pixel_count(), 0);
    }

    #[test]
    fn test_extreme_clock_jump_closes_window() {
        let mut filter = HotPixelSuppressor::new(Resolution::new(8, 8), config(HotPixelMode::Adaptive));
        let batch: EventBatch = vec![Event::new(i64::MIN, 1, 1, true), Event::new(i64::MAX, 2, 2, true)]
            .into_iter()
            .collect();
        assert_eq!(filter.process(batch).len(), 2);
        assert_eq!(filter.hot_pixel_count(), 0);
    }
}
