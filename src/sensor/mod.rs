pub mod playback;
pub mod simulated;

use crate::bias::{BiasChannel, BiasRange, BiasValue};
use crate::error::Result;
use crate::events::{EventBatch, FrameImage, Resolution};

pub use playback::{PlaybackDriver, PlaybackSensor};
pub use simulated::{SimulatedDriver, SimulatedSensor};

// -----------------------------------------------------------------------------
// DRIVER INTERFACE
// -----------------------------------------------------------------------------

/// One open event camera. Polls never block; `Ok(None)` means nothing new
/// this tick. Hardware failures come back as `SensorUnavailable` and are not
/// retried here.
pub trait SensorSession: Send {
    fn serial(&self) -> &str;

    /// Fixed for the lifetime of the session.
    fn resolution(&self) -> Resolution;

    fn enable_frames(&mut self, enabled: bool) -> Result<()>;
    fn enable_events(&mut self, enabled: bool) -> Result<()>;

    fn poll_frame(&mut self) -> Result<Option<FrameImage>>;
    /// Next batch, with timestamps non-decreasing. A batch that breaks the
    /// order is still processed; the pipeline logs a warning.
    fn poll_event_batch(&mut self) -> Result<Option<EventBatch>>;

    fn bias(&self, channel: BiasChannel) -> Result<BiasValue>;
    fn set_bias(&mut self, channel: BiasChannel, value: BiasValue) -> Result<()>;

    /// Register widths for `channel`.
    fn bias_range(&self, _channel: BiasChannel) -> BiasRange {
        BiasRange::DAVIS346
    }

    /// True once a finite source (a recording) has nothing left to give.
    fn is_finished(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<()>;
}

pub trait SensorDriver {
    fn open(&self, serial: &str) -> Result<Box<dyn SensorSession>>;
}

// BIAS READOUT ----------------------------------------------------------------

/// All six channels of one sensor, in declaration order.
pub fn read_biases(sensor: &dyn SensorSession) -> Result<Vec<(BiasChannel, BiasValue)>> {
    BiasChannel::ALL
        .iter()
        .map(|&channel| sensor.bias(channel).map(|value| (channel, value)))
        .collect()
}

/// Biases captured at session start so they can be put back on exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiasSnapshot {
    serial: String,
    values: Vec<(BiasChannel, BiasValue)>,
}

impl BiasSnapshot {
    pub fn capture(sensor: &dyn SensorSession) -> Result<Self> {
        Ok(Self {
            serial: sensor.serial().to_string(),
            values: read_biases(sensor)?,
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn values(&self) -> &[(BiasChannel, BiasValue)] {
        &self.values
    }

    pub fn restore(&self, sensor: &mut dyn SensorSession) -> Result<()> {
        for &(channel, value) in &self.values {
            sensor.set_bias(channel, value)?;
        }
        Ok(())
    }
}
