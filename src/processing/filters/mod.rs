pub mod background_activity;
pub mod hot_pixel;
pub mod temporal_median;

use tracing::debug;

use crate::config::NoiseFilterConfig;
use crate::events::{EventBatch, Resolution};

use background_activity::BackgroundActivitySuppressor;
use hot_pixel::HotPixelSuppressor;
use temporal_median::TemporalMedianSuppressor;

/// A stateful per-sensor noise filter. Takes the batch by value and returns
/// what survives; per-pixel history lives inside the filter for the
/// sensor's lifetime.
pub trait NoiseFilter: Send {
    fn name(&self) -> &'static str;
    fn process(&mut self, batch: EventBatch) -> EventBatch;
}

// FILTER CHAIN ----------------------------------------------------------------

/// Ordered filters applied left to right. Empty chain passes batches through.
#[derive(Default)]
pub struct NoiseFilterChain {
    filters: Vec<Box<dyn NoiseFilter>>,
}

impl NoiseFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the enabled filters of `configs`, in order, for one sensor.
    pub fn from_config(configs: &[NoiseFilterConfig], resolution: Resolution) -> Self {
        let mut chain = Self::new();
        for config in configs.iter().filter(|c| c.enabled()) {
            let filter: Box<dyn NoiseFilter> = match config {
                NoiseFilterConfig::BackgroundActivity(c) => {
                    Box::new(BackgroundActivitySuppressor::new(resolution, c.duration_us))
                }
                NoiseFilterConfig::HotPixel(c) => Box::new(HotPixelSuppressor::new(resolution, c.clone())),
                NoiseFilterConfig::TemporalMedian(c) => Box::new(TemporalMedianSuppressor::new(
                    resolution,
                    c.window,
                    c.min_interval_us,
                )),
            };
            chain.add_filter(filter);
        }
        chain
    }

    pub fn add_filter(&mut self, filter: Box<dyn NoiseFilter>) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn process(&mut self, batch: EventBatch) -> EventBatch {
        self.filters.iter_mut().fold(batch, |batch, filter| {
            let before = batch.len();
            let out = filter.process(batch);
            debug!(filter = filter.name(), before, after = out.len(), "noise filter pass");
            out
        })
    }
}
