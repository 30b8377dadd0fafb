use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{SensorDriver, SensorSession};
use crate::bias::{BiasChannel, BiasRange, BiasValue};
use crate::config::SimulationConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBatch, FrameImage, Resolution};

// -----------------------------------------------------------------------------
// SETUP FOR THE SIMULATED SENSOR
// -----------------------------------------------------------------------------

/// Caps a single poll so a stalled loop cannot produce a huge batch.
const MAX_EVENTS_PER_POLL: usize = 200_000;
/// Each hot pixel fires this often regardless of the scene.
const HOT_PIXEL_RATE: f64 = 2_000.0;

/// DAVIS346 power-on defaults, in `BiasChannel::ALL` order.
const DEFAULT_BIASES: [BiasValue; 6] = [
    BiasValue { coarse: 2, fine: 58 },
    BiasValue { coarse: 1, fine: 33 },
    BiasValue { coarse: 4, fine: 39 },
    BiasValue { coarse: 5, fine: 255 },
    BiasValue { coarse: 4, fine: 0 },
    BiasValue { coarse: 4, fine: 25 },
];

fn channel_slot(channel: BiasChannel) -> usize {
    BiasChannel::ALL
        .iter()
        .position(|&c| c == channel)
        .unwrap_or_default()
}

/// Opens simulated sensors for any serial.
pub struct SimulatedDriver {
    config: SimulationConfig,
}

impl SimulatedDriver {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }
}

impl SensorDriver for SimulatedDriver {
    fn open(&self, serial: &str) -> Result<Box<dyn SensorSession>> {
        Ok(Box::new(SimulatedSensor::new(serial, self.config.clone())))
    }
}

// -----------------------------------------------------------------------------
// SIMULATED SENSOR
// -----------------------------------------------------------------------------

/// Random event source whose rate follows the On threshold: the higher the
/// On coarse value, the fewer events, so the autobias loop has something to
/// regulate.
pub struct SimulatedSensor {
    serial: String,
    resolution: Resolution,
    config: SimulationConfig,
    rng: StdRng,
    biases: [BiasValue; 6],
    hot_pixels: Vec<(u16, u16)>,
    frames_enabled: bool,
    events_enabled: bool,
    opened_at: Instant,
    last_event_us: i64,
    carry: f64,
    last_frame: Option<Instant>,
    closed: bool,
}

impl SimulatedSensor {
    pub fn new(serial: &str, config: SimulationConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => {
                let salt = serial
                    .bytes()
                    .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64));
                StdRng::seed_from_u64(seed ^ salt)
            }
            None => StdRng::from_entropy(),
        };
        let resolution = Resolution::new(config.width, config.height);
        let hot_pixels = (0..config.hot_pixels)
            .map(|_| {
                (
                    rng.gen_range(0..resolution.width),
                    rng.gen_range(0..resolution.height),
                )
            })
            .collect();

        Self {
            serial: serial.to_string(),
            resolution,
            config,
            rng,
            biases: DEFAULT_BIASES,
            hot_pixels,
            frames_enabled: false,
            events_enabled: false,
            opened_at: Instant::now(),
            last_event_us: 0,
            carry: 0.0,
            last_frame: None,
            closed: false,
        }
    }

    /// Scene event rate (events/sec) at the current On bias, hot pixels
    /// excluded.
    pub fn expected_rate(&self) -> f64 {
        let on = self.biases[channel_slot(BiasChannel::On)];
        let reference = self.config.reference_coarse.max(1) as f64;
        self.config.base_rate * reference / on.coarse.max(1) as f64
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::sensor(&self.serial, "device closed"));
        }
        Ok(())
    }

    /// Generates everything that happened between the previous poll and
    /// sensor time `now_us`.
    pub(crate) fn events_until(&mut self, now_us: i64) -> Option<EventBatch> {
        let span_us = now_us - self.last_event_us;
        if span_us <= 0 {
            return None;
        }
        let span_s = span_us as f64 / 1e6;

        self.carry += self.expected_rate() * span_s;
        let scene = self.carry.floor();
        self.carry -= scene;
        let hot_each = (HOT_PIXEL_RATE * span_s).round() as usize;
        let total = (scene as usize + hot_each * self.hot_pixels.len()).min(MAX_EVENTS_PER_POLL);
        let start = self.last_event_us;
        self.last_event_us = now_us;
        if total == 0 {
            return None;
        }

        let mut events = Vec::with_capacity(total);
        for &(x, y) in &self.hot_pixels {
            for _ in 0..hot_each.min(total - events.len()) {
                let ts = self.rng.gen_range(start + 1..=now_us);
                events.push(Event::new(ts, x, y, self.rng.gen()));
            }
        }
        while events.len() < total {
            let ts = self.rng.gen_range(start + 1..=now_us);
            let x = self.rng.gen_range(0..self.resolution.width);
            let y = self.rng.gen_range(0..self.resolution.height);
            events.push(Event::new(ts, x, y, self.rng.gen()));
        }
        events.sort_unstable_by_key(|e| e.timestamp);
        Some(events.into_iter().collect())
    }

    fn render_frame(&mut self, timestamp: i64) -> FrameImage {
        let Resolution { width, height } = self.resolution;
        let mut data = Vec::with_capacity(self.resolution.pixel_count());
        for y in 0..height as usize {
            for x in 0..width as usize {
                let base = ((x + y) * 255 / (width as usize + height as usize).max(1)) as i32;
                let noise = self.rng.gen_range(-8..8);
                data.push((base + noise).clamp(0, 255) as u8);
            }
        }
        FrameImage {
            resolution: self.resolution,
            timestamp,
            data,
        }
    }
}

impl SensorSession for SimulatedSensor {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn enable_frames(&mut self, enabled: bool) -> Result<()> {
        self.check_open()?;
        self.frames_enabled = enabled;
        Ok(())
    }

    fn enable_events(&mut self, enabled: bool) -> Result<()> {
        self.check_open()?;
        if enabled && !self.events_enabled {
            self.last_event_us = self.opened_at.elapsed().as_micros() as i64;
        }
        self.events_enabled = enabled;
        Ok(())
    }

    fn poll_frame(&mut self) -> Result<Option<FrameImage>> {
        self.check_open()?;
        if !self.frames_enabled {
            return Ok(None);
        }
        let now = Instant::now();
        let interval = Duration::from_millis(self.config.frame_interval_ms);
        if self.last_frame.map_or(false, |t| now.duration_since(t) < interval) {
            return Ok(None);
        }
        self.last_frame = Some(now);
        let timestamp = now.duration_since(self.opened_at).as_micros() as i64;
        Ok(Some(self.render_frame(timestamp)))
    }

    fn poll_event_batch(&mut self) -> Result<Option<EventBatch>> {
        self.check_open()?;
        if !self.events_enabled {
            return Ok(None);
        }
        let now_us = self.opened_at.elapsed().as_micros() as i64;
        Ok(self.events_until(now_us))
    }

    fn bias(&self, channel: BiasChannel) -> Result<BiasValue> {
        self.check_open()?;
        Ok(self.biases[channel_slot(channel)])
    }

    fn set_bias(&mut self, channel: BiasChannel, value: BiasValue) -> Result<()> {
        self.check_open()?;
        self.bias_range(channel)
            .validate(channel, value.coarse as u32, value.fine as u32)?;
        self.biases[channel_slot(channel)] = value;
        Ok(())
    }

    fn bias_range(&self, _channel: BiasChannel) -> BiasRange {
        BiasRange {
            max_coarse: self.config.coarse_max,
            max_fine: 255,
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.events_enabled = false;
        self.frames_enabled = false;
        Ok(())
    }
}
