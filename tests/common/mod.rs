#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dvs_autobias::bias::{BiasChannel, BiasRange, BiasValue};
use dvs_autobias::config::{Config, SensorConfig};
use dvs_autobias::error::{Error, Result};
use dvs_autobias::events::{Event, EventBatch, FrameImage, Resolution};
use dvs_autobias::processing::raster::RasterImage;
use dvs_autobias::recording::{EventSink, SinkOpener};
use dvs_autobias::sensor::{SensorDriver, SensorSession};
use dvs_autobias::session::{Command, CommandSource, DisplaySink, TickReport};

pub const RESOLUTION: Resolution = Resolution {
    width: 8,
    height: 8,
};

// SCRIPTED SENSOR -------------------------------------------------------------

/// Shared with the test so it can be inspected after the session is gone.
#[derive(Default)]
pub struct SensorState {
    pub biases: HashMap<BiasChannel, BiasValue>,
    pub batches: VecDeque<EventBatch>,
    /// Handed out whenever `batches` is empty.
    pub repeat: Option<EventBatch>,
    pub fail_polls: bool,
    /// `is_finished` once `batches` drains.
    pub finite: bool,
    pub closed: bool,
    /// Register widths; DAVIS346 when unset.
    pub range: Option<BiasRange>,
    /// `set_bias` fails without taking the sensor down.
    pub reject_writes: bool,
}

pub type SharedState = Arc<Mutex<SensorState>>;

pub struct ScriptedSensor {
    serial: String,
    state: SharedState,
}

impl SensorSession for ScriptedSensor {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn resolution(&self) -> Resolution {
        RESOLUTION
    }

    fn enable_frames(&mut self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn enable_events(&mut self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn poll_frame(&mut self) -> Result<Option<FrameImage>> {
        Ok(None)
    }

    fn poll_event_batch(&mut self) -> Result<Option<EventBatch>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_polls {
            return Err(Error::sensor(&self.serial, "usb disconnected"));
        }
        match state.batches.pop_front() {
            Some(batch) => Ok(Some(batch)),
            None => Ok(state.repeat.clone()),
        }
    }

    fn bias(&self, channel: BiasChannel) -> Result<BiasValue> {
        let state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::sensor(&self.serial, "closed"));
        }
        Ok(state.biases.get(&channel).copied().unwrap_or_default())
    }

    fn set_bias(&mut self, channel: BiasChannel, value: BiasValue) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.reject_writes {
            return Err(Error::Io(io::Error::new(io::ErrorKind::Other, "register write rejected")));
        }
        state
            .range
            .unwrap_or(BiasRange::DAVIS346)
            .validate(channel, value.coarse as u32, value.fine as u32)?;
        state.biases.insert(channel, value);
        Ok(())
    }

    fn bias_range(&self, _channel: BiasChannel) -> BiasRange {
        self.state.lock().unwrap().range.unwrap_or(BiasRange::DAVIS346)
    }

    fn is_finished(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.finite && state.batches.is_empty()
    }

    fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

pub struct ScriptedDriver {
    pub sensors: HashMap<String, SharedState>,
}

impl ScriptedDriver {
    /// Every sensor starts with On = (6, 40).
    pub fn new(serials: &[&str]) -> Self {
        let sensors = serials
            .iter()
            .map(|serial| {
                let mut state = SensorState::default();
                state.biases.insert(BiasChannel::On, BiasValue::new(6, 40));
                (serial.to_string(), Arc::new(Mutex::new(state)))
            })
            .collect();
        Self { sensors }
    }

    pub fn state(&self, serial: &str) -> &SharedState {
        &self.sensors[serial]
    }
}

impl SensorDriver for ScriptedDriver {
    fn open(&self, serial: &str) -> Result<Box<dyn SensorSession>> {
        let state = self
            .sensors
            .get(serial)
            .ok_or_else(|| Error::sensor(serial, "no such device"))?;
        Ok(Box::new(ScriptedSensor {
            serial: serial.to_string(),
            state: state.clone(),
        }))
    }
}

// MEMORY SINK -----------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    pub events: HashMap<String, Vec<Event>>,
    pub opened: Vec<PathBuf>,
    pub finished: Vec<String>,
}

pub struct MemorySink {
    serial: String,
    path: PathBuf,
    store: Arc<Mutex<MemoryStore>>,
}

impl EventSink for MemorySink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, batch: &EventBatch) -> io::Result<()> {
        let mut store = self.store.lock().unwrap();
        store.events.entry(self.serial.clone()).or_default().extend(batch.iter());
        Ok(())
    }

    fn finish(self: Box<Self>) -> io::Result<()> {
        self.store.lock().unwrap().finished.push(self.serial.clone());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryOpener {
    pub store: Arc<Mutex<MemoryStore>>,
}

impl SinkOpener for MemoryOpener {
    fn open(&self, path: &Path, serial: &str, _resolution: Resolution) -> Result<Box<dyn EventSink>> {
        self.store.lock().unwrap().opened.push(path.to_path_buf());
        Ok(Box::new(MemorySink {
            serial: serial.to_string(),
            path: path.to_path_buf(),
            store: self.store.clone(),
        }))
    }
}

// DISPLAY / COMMANDS ----------------------------------------------------------

#[derive(Default)]
pub struct RecordingDisplay {
    pub rasters: Vec<(String, usize)>,
    pub biases: Vec<(String, BiasChannel, BiasValue)>,
    pub errors: Vec<String>,
    pub reports: Vec<TickReport>,
}

impl DisplaySink for RecordingDisplay {
    fn show_raster(&mut self, serial: &str, raster: &RasterImage) {
        self.rasters.push((serial.to_string(), raster.active_pixels()));
    }

    fn show_bias(&mut self, serial: &str, channel: BiasChannel, value: BiasValue) {
        self.biases.push((serial.to_string(), channel, value));
    }

    fn show_error(&mut self, source: &str, error: &Error) {
        self.errors.push(format!("{}: {}", source, error));
    }

    fn report(&mut self, report: &TickReport) {
        self.reports.push(report.clone());
    }
}

pub struct ScriptedCommands(pub VecDeque<Command>);

impl CommandSource for ScriptedCommands {
    fn poll_command(&mut self, _timeout: Duration) -> Option<Command> {
        self.0.pop_front()
    }
}

// HELPERS ---------------------------------------------------------------------

pub fn test_config(serials: &[&str], output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.sensors = serials
        .iter()
        .map(|s| SensorConfig {
            serial: s.to_string(),
        })
        .collect();
    config.filters.clear();
    config.session.enable_frames = false;
    config.recording.output_dir = output_dir.to_path_buf();
    config
}

pub fn batch(timestamps: std::ops::Range<i64>) -> EventBatch {
    timestamps
        .map(|t| Event::new(t, (t % 8) as u16, ((t / 8) % 8) as u16, t % 2 == 0))
        .collect()
}
