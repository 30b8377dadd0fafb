// src/config/mod.rs
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bias::BiasChannel;
use crate::error::{Error, Result};
use crate::processing::filters::temporal_median::MAX_MEDIAN_WINDOW;
use crate::processing::raster::RasterMode;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub sensors: Vec<SensorConfig>,
    pub session: SessionConfig,
    pub autobias: AutobiasConfig,
    pub filters: Vec<NoiseFilterConfig>,
    pub recording: RecordingConfig,
    pub logging: LoggingConfig,
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensors: vec![
                SensorConfig {
                    serial: "AERS0004".to_string(),
                },
                SensorConfig {
                    serial: "00000591".to_string(),
                },
            ],
            session: SessionConfig::default(),
            autobias: AutobiasConfig::default(),
            filters: vec![
                NoiseFilterConfig::BackgroundActivity(BackgroundActivityConfig::default()),
                NoiseFilterConfig::HotPixel(HotPixelConfig::default()),
                NoiseFilterConfig::TemporalMedian(TemporalMedianConfig::default()),
            ],
            recording: RecordingConfig::default(),
            logging: LoggingConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SensorConfig {
    pub serial: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub raster_mode: RasterMode,
    pub enable_frames: bool,
    pub poll_timeout_ms: u64,
    pub restore_biases_on_exit: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            raster_mode: RasterMode::Mono,
            enable_frames: true,
            poll_timeout_ms: 1,
            restore_biases_on_exit: false,
        }
    }
}

// AUTOBIAS --------------------------------------------------------------------

/// Which event count feeds the rate estimate.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Raw,
    Filtered,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AutobiasConfig {
    pub enabled: bool,
    pub channel: BiasChannel,
    pub rate_check_interval_s: f64,
    pub low_rate_threshold: f64,
    pub high_rate_threshold: f64,
    pub hysteresis_count: u32,
    pub min_coarse: u8,
    pub max_coarse: u8,
    pub rate_source: RateSource,
}

impl Default for AutobiasConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: BiasChannel::On,
            rate_check_interval_s: 1.0,
            low_rate_threshold: 100_000.0,
            high_rate_threshold: 500_000.0,
            hysteresis_count: 3,
            min_coarse: 5,
            max_coarse: 250,
            rate_source: RateSource::Raw,
        }
    }
}

// NOISE FILTERS ---------------------------------------------------------------

/// One entry of the noise filter chain. List order is chain order.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoiseFilterConfig {
    BackgroundActivity(BackgroundActivityConfig),
    HotPixel(HotPixelConfig),
    TemporalMedian(TemporalMedianConfig),
}

impl NoiseFilterConfig {
    pub fn enabled(&self) -> bool {
        match self {
            NoiseFilterConfig::BackgroundActivity(c) => c.enabled,
            NoiseFilterConfig::HotPixel(c) => c.enabled,
            NoiseFilterConfig::TemporalMedian(c) => c.enabled,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackgroundActivityConfig {
    pub enabled: bool,
    pub duration_us: i64,
}

impl Default for BackgroundActivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_us: 1_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HotPixelMode {
    /// Hot set is recomputed every window; pixels can recover.
    Adaptive,
    /// Once hot, always hot for the session.
    Permanent,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HotPixelConfig {
    pub enabled: bool,
    pub window_us: i64,
    pub rate_multiple: f64,
    pub min_events: u32,
    pub mode: HotPixelMode,
}

impl Default for HotPixelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_us: 1_000_000,
            rate_multiple: 10.0,
            min_events: 20,
            mode: HotPixelMode::Adaptive,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TemporalMedianConfig {
    pub enabled: bool,
    pub window: usize,
    pub min_interval_us: i64,
}

impl Default for TemporalMedianConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: 5,
            min_interval_us: 200,
        }
    }
}

// RECORDING / LOGGING / SIMULATION --------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub start_immediately: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            start_immediately: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// CSV file receiving one row per rate check.
    pub rate_log: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            rate_log: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SimulationConfig {
    pub width: u16,
    pub height: u16,
    /// Events/sec produced when the On coarse bias equals `reference_coarse`.
    pub base_rate: f64,
    pub reference_coarse: u8,
    pub coarse_max: u8,
    pub hot_pixels: usize,
    pub frame_interval_ms: u64,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            width: 346,
            height: 260,
            base_rate: 300_000.0,
            reference_coarse: 20,
            coarse_max: 255,
            hot_pixels: 0,
            frame_interval_ms: 33,
            seed: None,
        }
    }
}

// -----------------------------------------------------------------------------
// LOAD / SAVE
// -----------------------------------------------------------------------------

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.sensors.is_empty() {
            return Err(Error::Config("at least one sensor is required".to_string()));
        }

        let a = &self.autobias;
        if !(a.rate_check_interval_s > 0.0) {
            return Err(Error::Config(format!(
                "rate_check_interval_s must be positive, got {}",
                a.rate_check_interval_s
            )));
        }
        if a.low_rate_threshold >= a.high_rate_threshold {
            return Err(Error::Config(format!(
                "low_rate_threshold ({}) must be below high_rate_threshold ({})",
                a.low_rate_threshold, a.high_rate_threshold
            )));
        }
        if a.min_coarse > a.max_coarse {
            return Err(Error::Config(format!(
                "min_coarse ({}) exceeds max_coarse ({})",
                a.min_coarse, a.max_coarse
            )));
        }
        if a.hysteresis_count == 0 {
            return Err(Error::Config("hysteresis_count must be at least 1".to_string()));
        }

        for filter in &self.filters {
            match filter {
                NoiseFilterConfig::BackgroundActivity(c) if c.duration_us <= 0 => {
                    return Err(Error::Config("background_activity duration_us must be positive".to_string()));
                }
                NoiseFilterConfig::HotPixel(c) if c.window_us <= 0 || !(c.rate_multiple > 0.0) => {
                    return Err(Error::Config(
                        "hot_pixel window_us and rate_multiple must be positive".to_string(),
                    ));
                }
                NoiseFilterConfig::TemporalMedian(c)
                    if c.window == 0 || c.window > MAX_MEDIAN_WINDOW || c.min_interval_us <= 0 =>
                {
                    return Err(Error::Config(format!(
                        "temporal_median window must be in 1..={} and min_interval_us positive",
                        MAX_MEDIAN_WINDOW
                    )));
                }
                _ => {}
            }
        }

        if self.simulation.width == 0 || self.simulation.height == 0 {
            return Err(Error::Config("simulation resolution must be non-zero".to_string()));
        }

        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

    let config: Config = serde_yaml::from_str(&config_str)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

    config.validate()?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<()> {
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

    fs::write(path, yaml).map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))
}
