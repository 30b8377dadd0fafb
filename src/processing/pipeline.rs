use std::sync::Arc;

use tracing::{info, warn};

use super::filters::NoiseFilterChain;
use super::raster::{RasterImage, Rasterizer};
use crate::bias::{BiasChannel, BiasValue};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventBatch, FrameImage, Resolution};
use crate::recording::{Recorder, SinkOpener};
use crate::sensor::{BiasSnapshot, SensorSession};

// -----------------------------------------------------------------------------
// RUST CORE LOGIC
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorStatus {
    Active,
    /// The sensor reported `SensorUnavailable`; it is no longer polled.
    Failed,
}

/// What one sensor produced in one tick.
#[derive(Debug, Default)]
pub struct TickOutput {
    pub frame: Option<FrameImage>,
    pub raw_events: usize,
    pub filtered_events: usize,
    /// The raster was redrawn from this tick's batch.
    pub rastered: bool,
    pub errors: Vec<Error>,
}

// SENSOR PIPELINE COMPONENT ---------------------------------------------------

/// One sensor plus everything scoped to it: its filter state, raster buffer
/// and recorder. Dropping the pipeline stops the recorder, optionally puts
/// the original biases back, and closes the sensor.
pub struct SensorPipeline {
    sensor: Box<dyn SensorSession>,
    resolution: Resolution,
    filters: NoiseFilterChain,
    rasterizer: Rasterizer,
    recorder: Recorder,
    status: SensorStatus,
    snapshot: Option<BiasSnapshot>,
}

impl SensorPipeline {
    pub fn new(sensor: Box<dyn SensorSession>, config: &Config, opener: Arc<dyn SinkOpener>) -> Result<Self> {
        let resolution = sensor.resolution();
        let serial = sensor.serial().to_string();
        let mut pipeline = Self {
            filters: NoiseFilterChain::from_config(&config.filters, resolution),
            rasterizer: Rasterizer::new(resolution, config.session.raster_mode),
            recorder: Recorder::new(&serial, resolution, config.recording.output_dir.clone(), opener),
            sensor,
            resolution,
            status: SensorStatus::Active,
            snapshot: None,
        };

        // From here on, any early return still closes the sensor via Drop.
        if config.session.restore_biases_on_exit {
            pipeline.snapshot = Some(BiasSnapshot::capture(pipeline.sensor.as_ref())?);
        }
        pipeline.sensor.enable_frames(config.session.enable_frames)?;
        pipeline.sensor.enable_events(true)?;

        info!(
            serial = %serial,
            width = resolution.width,
            height = resolution.height,
            filters = ?pipeline.filters.names(),
            "sensor pipeline ready"
        );
        Ok(pipeline)
    }

    pub fn serial(&self) -> &str {
        self.sensor.serial()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn status(&self) -> SensorStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == SensorStatus::Active
    }

    /// Failed sensors count as finished so a playback session can end.
    pub fn is_finished(&self) -> bool {
        !self.is_active() || self.sensor.is_finished()
    }

    pub fn raster(&self) -> &RasterImage {
        self.rasterizer.image()
    }

    pub fn filters(&self) -> &NoiseFilterChain {
        &self.filters
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut Recorder {
        &mut self.recorder
    }

    pub fn sensor(&self) -> &dyn SensorSession {
        self.sensor.as_ref()
    }

    fn fail(&mut self, error: &Error) {
        warn!(serial = %self.sensor.serial(), error = %error, "sensor failed, dropping it from the loop");
        self.status = SensorStatus::Failed;
        if let Err(e) = self.recorder.stop() {
            warn!(serial = %self.sensor.serial(), error = %e, "failed to finalize recording");
        }
    }

    /// Polls one frame and one event batch, drops events outside the sensor,
    /// then filters, rasterizes and records the batch. Never fails as a whole: problems are returned in
    /// `TickOutput::errors` and a sensor error marks the pipeline failed.
    pub fn run_tick(&mut self) -> TickOutput {
        let mut out = TickOutput::default();
        if !self.is_active() {
            return out;
        }

        match self.sensor.poll_frame() {
            Ok(frame) => out.frame = frame,
            Err(e) => {
                self.fail(&e);
                out.errors.push(e);
                return out;
            }
        }

        let batch = match self.sensor.poll_event_batch() {
            Ok(Some(batch)) => batch,
            Ok(None) => return out,
            Err(e) => {
                self.fail(&e);
                out.errors.push(e);
                return out;
            }
        };

        out.raw_events = batch.len();
        if !batch.is_time_ordered() {
            warn!(serial = %self.sensor.serial(), "event batch out of time order");
        }
        let mut batch = batch;
        if let Some(e) = reject_out_of_bounds(&mut batch, self.resolution) {
            warn!(serial = %self.sensor.serial(), error = %e, "events outside sensor area");
            out.errors.push(e);
        }
        let batch = self.filters.process(batch);
        out.filtered_events = batch.len();

        if let Err(e) = self.rasterizer.rasterize(&batch) {
            out.errors.push(e);
        }
        out.rastered = true;

        if let Err(e) = self.recorder.write(&batch) {
            out.errors.push(e);
        }
        out
    }

    pub fn bias(&self, channel: BiasChannel) -> Result<BiasValue> {
        self.sensor.bias(channel)
    }

    /// Writes one register pair. A sensor error here fails the pipeline the
    /// same way a poll error does.
    pub fn set_bias(&mut self, channel: BiasChannel, value: BiasValue) -> Result<()> {
        let result = self.sensor.set_bias(channel, value);
        if let Err(e) = &result {
            if matches!(e, Error::SensorUnavailable { .. }) {
                self.fail(e);
            }
        }
        result
    }

    /// Stops recording, restores biases if asked to, closes the sensor.
    /// Safe to call more than once.
    fn teardown(&mut self) {
        if let Err(e) = self.recorder.stop() {
            warn!(serial = %self.sensor.serial(), error = %e, "failed to finalize recording");
        }
        if let Some(snapshot) = self.snapshot.take() {
            if self.is_active() {
                match snapshot.restore(self.sensor.as_mut()) {
                    Ok(()) => info!(serial = %snapshot.serial(), "biases restored"),
                    Err(e) => warn!(serial = %snapshot.serial(), error = %e, "failed to restore biases"),
                }
            }
        }
        if let Err(e) = self.sensor.close() {
            warn!(serial = %self.sensor.serial(), error = %e, "failed to close sensor");
        }
    }
}

/// Drops events outside `resolution` so the filters, the raster and the
/// recording all see the same stream. Returns the `OutOfBounds` report.
fn reject_out_of_bounds(batch: &mut EventBatch, resolution: Resolution) -> Option<Error> {
    let mut first = None;
    let mut rejected = 0;
    batch.retain(|e| {
        if resolution.contains(e.x, e.y) {
            return true;
        }
        if first.is_none() {
            first = Some((e.x, e.y));
        }
        rejected += 1;
        false
    });
    first.map(|(x, y)| Error::OutOfBounds {
        x,
        y,
        width: resolution.width,
        height: resolution.height,
        rejected,
    })
}

impl Drop for SensorPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}
