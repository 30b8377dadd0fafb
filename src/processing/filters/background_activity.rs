use super::NoiseFilter;
use crate::events::{Event, EventBatch, Resolution};

const NEVER: i64 = i64::MIN;

/// Background activity filter.
///
/// An event passes only if one of its 8 neighbours fired within the trailing
/// `duration_us`. Isolated events (uncorrelated shot noise) are dropped. Keeps
/// one timestamp per pixel.
pub struct BackgroundActivitySuppressor {
    resolution: Resolution,
    duration_us: i64,
    last_timestamp: Vec<i64>,
}

impl BackgroundActivitySuppressor {
    pub fn new(resolution: Resolution, duration_us: i64) -> Self {
        Self {
            resolution,
            duration_us,
            last_timestamp: vec![NEVER; resolution.pixel_count()],
        }
    }

    fn accept(&mut self, event: Event) -> bool {
        if !self.resolution.contains(event.x, event.y) {
            return false;
        }

        let width = self.resolution.width as usize;
        let x = event.x as usize;
        let y = event.y as usize;
        let x_min = x.saturating_sub(1);
        let x_max = (x + 1).min(width - 1);
        let y_min = y.saturating_sub(1);
        let y_max = (y + 1).min(self.resolution.height as usize - 1);

        let mut supported = false;
        'scan: for ny in y_min..=y_max {
            for nx in x_min..=x_max {
                if nx == x && ny == y {
                    continue;
                }
                let last = self.last_timestamp[ny * width + nx];
                if last != NEVER && event.timestamp.saturating_sub(last) <= self.duration_us {
                    supported = true;
                    break 'scan;
                }
            }
        }

        self.last_timestamp[y * width + x] = event.timestamp;
        supported
    }
}

impl NoiseFilter for BackgroundActivitySuppressor {
    fn name(&self) -> &'static str {
        "background_activity"
    }

    fn process(&mut self, mut batch: EventBatch) -> EventBatch {
        batch.retain(|event| self.accept(event));
        batch
    }
}
