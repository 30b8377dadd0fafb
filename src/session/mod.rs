use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::bias::{BiasChannel, BiasCommand, BiasField, BiasRange, BiasValue};
use crate::config::{Config, RateSource};
use crate::error::{Error, Result};
use crate::events::FrameImage;
use crate::processing::autobias::{BiasController, BiasStep, ControllerState};
use crate::processing::pipeline::{SensorPipeline, TickOutput};
use crate::processing::raster::RasterImage;
use crate::processing::rate::RateEstimator;
use crate::recording::SinkOpener;
use crate::sensor::{read_biases, SensorDriver};
use crate::utils::log::{log_csv, rate_log_row, RATE_LOG_HEADERS};

// -----------------------------------------------------------------------------
// COMMANDS
// -----------------------------------------------------------------------------

/// The whole operator vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    StartRecording,
    StopRecording,
    SetBias(BiasCommand),
}

impl FromStr for Command {
    type Err = Error;

    /// `q`, `r`, `s`, or `<channel> coarse|fine <value>`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidCommand(s.trim().to_string());
        let words: Vec<&str> = s.split_whitespace().collect();
        match words.as_slice() {
            ["q"] | ["quit"] => Ok(Command::Quit),
            ["r"] | ["record"] => Ok(Command::StartRecording),
            ["s"] | ["stop"] => Ok(Command::StopRecording),
            [channel, field, value] => {
                let channel = channel.parse::<BiasChannel>()?;
                let field = match field.to_ascii_lowercase().as_str() {
                    "coarse" => BiasField::Coarse,
                    "fine" => BiasField::Fine,
                    _ => return Err(invalid()),
                };
                let value = value.parse::<u32>().map_err(|_| invalid())?;
                Ok(Command::SetBias(BiasCommand {
                    channel,
                    field,
                    value,
                }))
            }
            _ => Err(invalid()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

// DISPLAY / INPUT COLLABORATORS -----------------------------------------------

/// Receives everything the operator should see. All methods default to
/// doing nothing so headless runners only implement what they need.
pub trait DisplaySink {
    fn show_frame(&mut self, _serial: &str, _frame: &FrameImage) {}
    fn show_raster(&mut self, _serial: &str, _raster: &RasterImage) {}
    /// A register changed, by the operator or by autobias.
    fn show_bias(&mut self, _serial: &str, _channel: BiasChannel, _value: BiasValue) {}
    fn show_error(&mut self, _source: &str, _error: &Error) {}
    fn report(&mut self, _report: &TickReport) {}
}

pub trait CommandSource {
    /// Waits at most `timeout` for one command.
    fn poll_command(&mut self, timeout: Duration) -> Option<Command>;
}

/// Session-wide summary of one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub raw_events: usize,
    pub filtered_events: usize,
    pub active_sensors: usize,
    pub errors: usize,
    /// Set on rate-check ticks only.
    pub rate: Option<f64>,
    pub step: Option<BiasStep>,
    pub controller: Option<ControllerState>,
    pub recording: bool,
}

// -----------------------------------------------------------------------------
// SESSION
// -----------------------------------------------------------------------------

/// Every open sensor with its pipeline, the shared rate estimator and the
/// autobias controller. Dropping the session tears every sensor down.
pub struct Session {
    config: Config,
    pipelines: Vec<SensorPipeline>,
    rate: RateEstimator,
    controller: Option<BiasController>,
}

impl Session {
    /// Opens every configured sensor. Sensors that fail to open are logged
    /// and skipped; it is an error only if none opened.
    pub fn open(config: Config, driver: &dyn SensorDriver, opener: Arc<dyn SinkOpener>) -> Result<Self> {
        config.validate()?;

        let mut pipelines = Vec::with_capacity(config.sensors.len());
        for sensor_config in &config.sensors {
            let opened = driver
                .open(&sensor_config.serial)
                .and_then(|sensor| SensorPipeline::new(sensor, &config, opener.clone()));
            match opened {
                Ok(pipeline) => pipelines.push(pipeline),
                Err(e) => warn!(serial = %sensor_config.serial, error = %e, "skipping sensor"),
            }
        }
        if pipelines.is_empty() {
            let serials: Vec<&str> = config.sensors.iter().map(|s| s.serial.as_str()).collect();
            return Err(Error::sensor(serials.join(","), "no sensor could be opened"));
        }

        let controller = if config.autobias.enabled {
            let channel = config.autobias.channel;
            let initial = pipelines[0].bias(channel)?;
            // Every step goes to every sensor, so the narrowest register wins.
            let device_max = pipelines
                .iter()
                .map(|p| p.sensor().bias_range(channel).max_coarse)
                .min()
                .unwrap_or(BiasRange::DAVIS346.max_coarse);
            info!(channel = %channel, initial = %initial, max_coarse = device_max, "autobias enabled");
            Some(BiasController::new(&config.autobias, initial, device_max))
        } else {
            None
        };

        let interval = Duration::from_secs_f64(config.autobias.rate_check_interval_s);
        let rate = RateEstimator::new(interval, pipelines.len(), Instant::now());

        let mut session = Self {
            config,
            pipelines,
            rate,
            controller,
        };
        if session.config.recording.start_immediately {
            session.start_recording()?;
        }
        Ok(session)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipelines(&self) -> &[SensorPipeline] {
        &self.pipelines
    }

    pub fn active_sensors(&self) -> usize {
        self.pipelines.iter().filter(|p| p.is_active()).count()
    }

    pub fn controller_state(&self) -> Option<ControllerState> {
        self.controller.as_ref().map(|c| c.state())
    }

    pub fn is_recording(&self) -> bool {
        self.pipelines.iter().any(|p| p.recorder().is_recording())
    }

    /// True when no sensor has anything left to deliver.
    pub fn all_finished(&self) -> bool {
        self.pipelines.iter().all(|p| p.is_finished())
    }

    // TICK --------------------------------------------------------------------

    /// One scheduling tick. Sensors are processed in parallel, each pipeline
    /// owned by exactly one task; display, rate accounting and the controller
    /// run afterwards on the calling thread.
    pub fn tick(&mut self, display: &mut dyn DisplaySink, now: Instant) -> TickReport {
        let outputs: Vec<TickOutput> = self
            .pipelines
            .par_iter_mut()
            .map(|pipeline| pipeline.run_tick())
            .collect();

        let mut report = TickReport::default();
        for (pipeline, out) in self.pipelines.iter().zip(outputs) {
            let serial = pipeline.serial();
            if let Some(frame) = &out.frame {
                display.show_frame(serial, frame);
            }
            if out.rastered {
                display.show_raster(serial, pipeline.raster());
            }
            for error in &out.errors {
                display.show_error(serial, error);
            }
            report.raw_events += out.raw_events;
            report.filtered_events += out.filtered_events;
            report.errors += out.errors.len();
        }

        self.rate.record(match self.config.autobias.rate_source {
            RateSource::Raw => report.raw_events,
            RateSource::Filtered => report.filtered_events,
        });

        if let Some(rate) = self.rate.tick(now) {
            report.rate = Some(rate);
            let mut step = self.controller.as_mut().and_then(|c| c.observe(rate));
            if let Some(taken) = step {
                info!(
                    channel = %taken.channel,
                    from = taken.from,
                    to = taken.value.coarse,
                    rate,
                    "autobias step"
                );
                // Per-sensor failures are reported to the display inside.
                let (written, _) = self.write_all(taken.channel, taken.value, display);
                if written == 0 {
                    warn!(channel = %taken.channel, coarse = taken.from, "autobias step not applied, rolling back");
                    if let Some(controller) = self.controller.as_mut() {
                        controller.sync(BiasValue::new(taken.from, taken.value.fine));
                    }
                    step = None;
                }
            }
            report.step = step;
            self.log_rate(rate, step.as_ref());
        }

        report.controller = self.controller_state();
        report.active_sensors = self.active_sensors();
        report.recording = self.is_recording();
        report
    }

    fn log_rate(&self, rate: f64, step: Option<&BiasStep>) {
        let (Some(path), Some(state)) = (&self.config.logging.rate_log, self.controller_state()) else {
            debug!(rate, "rate check");
            return;
        };
        if let Err(e) = log_csv(path, &RATE_LOG_HEADERS, &rate_log_row(rate, state, step)) {
            warn!(path = %path.display(), error = %e, "failed to append rate log");
        }
    }

    /// Writes `value` to every active sensor, reporting per-sensor failures
    /// to `display`. Returns how many sensors took the value and the first
    /// failure.
    fn write_all(
        &mut self,
        channel: BiasChannel,
        value: BiasValue,
        display: &mut dyn DisplaySink,
    ) -> (usize, Option<Error>) {
        let mut written = 0;
        let mut first_error = None;
        for pipeline in self.pipelines.iter_mut().filter(|p| p.is_active()) {
            match pipeline.set_bias(channel, value) {
                Ok(()) => {
                    written += 1;
                    display.show_bias(pipeline.serial(), channel, value);
                }
                Err(e) => {
                    warn!(serial = %pipeline.serial(), channel = %channel, error = %e, "bias write failed");
                    display.show_error(pipeline.serial(), &e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        (written, first_error)
    }

    // COMMANDS ----------------------------------------------------------------

    pub fn dispatch(&mut self, command: Command, display: &mut dyn DisplaySink) -> Result<Flow> {
        match command {
            Command::Quit => return Ok(Flow::Quit),
            Command::StartRecording => {
                self.start_recording()?;
            }
            Command::StopRecording => self.stop_recording()?,
            Command::SetBias(command) => {
                self.apply_bias_command(command, display)?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Manual override: validated against every active sensor's register
    /// width, then written to all of them at once. No clamping; on a bad
    /// value nothing is written. Resyncs the controller when it touches the
    /// controlled channel.
    pub fn set_bias(
        &mut self,
        channel: BiasChannel,
        coarse: u32,
        fine: u32,
        display: &mut dyn DisplaySink,
    ) -> Result<BiasValue> {
        let mut value = None;
        for pipeline in self.pipelines.iter().filter(|p| p.is_active()) {
            value = Some(pipeline.sensor().bias_range(channel).validate(channel, coarse, fine)?);
        }
        let value = value.ok_or_else(|| Error::sensor("session", "no active sensor"))?;

        let (_, error) = self.write_all(channel, value, display);
        if let Some(controller) = self.controller.as_mut().filter(|c| c.channel() == channel) {
            controller.sync(value);
        }
        info!(channel = %channel, value = %value, "bias set");
        error.map_or(Ok(value), Err)
    }

    /// Resolves the half of the pair the command leaves out from the first
    /// active sensor, then calls `set_bias`.
    pub fn apply_bias_command(&mut self, command: BiasCommand, display: &mut dyn DisplaySink) -> Result<BiasValue> {
        let current = self
            .pipelines
            .iter()
            .find(|p| p.is_active())
            .ok_or_else(|| Error::sensor("session", "no active sensor"))?
            .bias(command.channel)?;
        let (coarse, fine) = command.resolve(current);
        self.set_bias(command.channel, coarse, fine, display)
    }

    /// Current registers of every active sensor.
    pub fn biases(&self) -> Vec<(String, Result<Vec<(BiasChannel, BiasValue)>>)> {
        self.pipelines
            .iter()
            .filter(|p| p.is_active())
            .map(|p| (p.serial().to_string(), read_biases(p.sensor())))
            .collect()
    }

    /// Starts recording on every active sensor. All sensors are tried; the
    /// first failure is returned.
    pub fn start_recording(&mut self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut first_error = None;
        for pipeline in self.pipelines.iter_mut().filter(|p| p.is_active()) {
            match pipeline.recorder_mut().start() {
                Ok(path) => paths.push(path),
                Err(e) => {
                    warn!(serial = %pipeline.serial(), error = %e, "could not start recording");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        first_error.map_or(Ok(paths), Err)
    }

    pub fn stop_recording(&mut self) -> Result<()> {
        let mut first_error = None;
        for pipeline in self.pipelines.iter_mut() {
            if let Err(e) = pipeline.recorder_mut().stop() {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // LOOP --------------------------------------------------------------------

    /// Ticks until quit, until `stop` is raised, or until every sensor is
    /// finished. Each tick waits at most the configured poll timeout for one
    /// command.
    pub fn run(&mut self, display: &mut dyn DisplaySink, commands: &mut dyn CommandSource, stop: &AtomicBool) {
        let poll_timeout = Duration::from_millis(self.config.session.poll_timeout_ms);
        loop {
            if stop.load(Ordering::Relaxed) {
                info!("stop requested");
                break;
            }

            let report = self.tick(display, Instant::now());
            display.report(&report);

            if self.all_finished() {
                info!("all sensors finished");
                break;
            }

            if let Some(command) = commands.poll_command(poll_timeout) {
                match self.dispatch(command, display) {
                    Ok(Flow::Quit) => {
                        info!("quit requested");
                        break;
                    }
                    Ok(Flow::Continue) => {}
                    Err(e) => {
                        warn!(error = %e, "command failed");
                        display.show_error("session", &e);
                    }
                }
            }
        }
    }

    /// Explicit teardown; dropping the session does the same.
    pub fn close(self) {
        info!(sensors = self.pipelines.len(), "closing session");
    }
}
