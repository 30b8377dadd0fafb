pub mod csv_sink;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::events::{EventBatch, Resolution};

pub use csv_sink::{read_recording, CsvEventSink, CsvSinkOpener, Recording, RecordingMetadata};

// -----------------------------------------------------------------------------
// RECORDING COLLABORATOR
// -----------------------------------------------------------------------------

/// An open, append-only event stream on disk.
pub trait EventSink: Send {
    fn path(&self) -> &Path;
    fn append(&mut self, batch: &EventBatch) -> io::Result<()>;
    /// Flushes and closes the stream.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

pub trait SinkOpener: Send + Sync {
    fn open(&self, path: &Path, serial: &str, resolution: Resolution) -> Result<Box<dyn EventSink>>;
}

/// `<output_dir>/<serial>_<YYYYmmdd_HHMMSS>.csv`, with `_1`, `_2`, ... added
/// when a recording of that name already exists.
pub fn recording_path(output_dir: &Path, serial: &str, started: DateTime<Local>) -> PathBuf {
    let stem = format!("{}_{}", serial, started.format("%Y%m%d_%H%M%S"));
    let mut path = output_dir.join(format!("{}.csv", stem));
    let mut suffix = 1;
    while path.exists() {
        path = output_dir.join(format!("{}_{}.csv", stem, suffix));
        suffix += 1;
    }
    path
}

// -----------------------------------------------------------------------------
// RECORDER
// -----------------------------------------------------------------------------

/// Start/stop latch in front of one sensor's event sink.
///
/// `write` only persists while the latch is set. The sink is opened on
/// `start` and released on `stop`, on the first failed append, or on drop.
pub struct Recorder {
    serial: String,
    resolution: Resolution,
    output_dir: PathBuf,
    opener: Arc<dyn SinkOpener>,
    sink: Option<Box<dyn EventSink>>,
    recording: bool,
    written: u64,
}

impl Recorder {
    pub fn new(
        serial: &str,
        resolution: Resolution,
        output_dir: impl Into<PathBuf>,
        opener: Arc<dyn SinkOpener>,
    ) -> Self {
        Self {
            serial: serial.to_string(),
            resolution,
            output_dir: output_dir.into(),
            opener,
            sink: None,
            recording: false,
            written: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Events persisted since the last `start`.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|sink| sink.path())
    }

    /// Opens a fresh sink and sets the latch. Already recording is a no-op.
    pub fn start(&mut self) -> Result<PathBuf> {
        if let Some(sink) = self.sink.as_ref().filter(|_| self.recording) {
            return Ok(sink.path().to_path_buf());
        }
        std::fs::create_dir_all(&self.output_dir)?;
        let path = recording_path(&self.output_dir, &self.serial, Local::now());
        let sink = self.opener.open(&path, &self.serial, self.resolution)?;
        info!(serial = %self.serial, path = %path.display(), "recording started");
        self.sink = Some(sink);
        self.recording = true;
        self.written = 0;
        Ok(path)
    }

    /// Appends `batch` while recording; otherwise drops it silently.
    ///
    /// A failed append stops the recording: the latch is cleared and the sink
    /// released before the error is returned.
    pub fn write(&mut self, batch: &EventBatch) -> Result<()> {
        if !self.recording || batch.is_empty() {
            return Ok(());
        }
        let Some(sink) = self.sink.as_mut() else {
            self.recording = false;
            return Ok(());
        };
        if let Err(source) = sink.append(batch) {
            self.recording = false;
            let path = sink.path().to_path_buf();
            if let Some(sink) = self.sink.take() {
                // The stream is already broken; a second error adds nothing.
                let _ = sink.finish();
            }
            warn!(serial = %self.serial, path = %path.display(), error = %source, "recording stopped");
            return Err(Error::SinkWriteFailure { path, source });
        }
        self.written += batch.len() as u64;
        Ok(())
    }

    /// Clears the latch and finalizes the sink. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        self.recording = false;
        let Some(sink) = self.sink.take() else {
            return Ok(());
        };
        let path = sink.path().to_path_buf();
        sink.finish()
            .map_err(|source| Error::SinkWriteFailure { path: path.clone(), source })?;
        info!(serial = %self.serial, path = %path.display(), events = self.written, "recording stopped");
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(serial = %self.serial, error = %e, "failed to finalize recording");
        }
    }
}
