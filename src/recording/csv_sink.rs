use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

use super::{EventSink, SinkOpener};
use crate::error::{Error, Result};
use crate::events::{Event, EventBatch, Resolution};

pub const CSV_HEADER: [&str; 4] = ["timestamp", "x", "y", "polarity"];

/// One CSV row. Polarity is stored as 0/1.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventRow {
    pub timestamp: i64,
    pub x: u16,
    pub y: u16,
    pub polarity: u8,
}

impl From<Event> for EventRow {
    fn from(event: Event) -> Self {
        Self {
            timestamp: event.timestamp,
            x: event.x,
            y: event.y,
            polarity: event.polarity as u8,
        }
    }
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event::new(row.timestamp, row.x, row.y, row.polarity != 0)
    }
}

/// Sidecar written next to every recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub serial: String,
    pub width: u16,
    pub height: u16,
    pub started_at: String,
}

impl RecordingMetadata {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// `foo.csv` -> `foo.meta.yaml`
pub fn metadata_path(recording: &Path) -> PathBuf {
    recording.with_extension("meta.yaml")
}

// WRITER ----------------------------------------------------------------------

pub struct CsvSinkOpener;

impl SinkOpener for CsvSinkOpener {
    fn open(&self, path: &Path, serial: &str, resolution: Resolution) -> Result<Box<dyn EventSink>> {
        let metadata = RecordingMetadata {
            serial: serial.to_string(),
            width: resolution.width,
            height: resolution.height,
            started_at: Local::now().to_rfc3339(),
        };
        let yaml = serde_yaml::to_string(&metadata)
            .map_err(|e| Error::Config(format!("Failed to serialize recording metadata: {}", e)))?;
        fs::write(metadata_path(path), yaml)?;

        Ok(Box::new(CsvEventSink::create(path)?))
    }
}

pub struct CsvEventSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvEventSink {
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        // Explicit so that an empty recording still carries its header.
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }
}

impl EventSink for CsvEventSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, batch: &EventBatch) -> io::Result<()> {
        for event in batch.iter() {
            self.writer.serialize(EventRow::from(event))?;
        }
        self.writer.flush()
    }

    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.writer.flush()
    }
}

// READER ----------------------------------------------------------------------

/// A recording loaded back into memory, rows in file order.
#[derive(Debug, Clone)]
pub struct Recording {
    pub metadata: Option<RecordingMetadata>,
    pub events: Vec<Event>,
}

impl Recording {
    /// Sidecar resolution, or the bounding box of the events when the
    /// sidecar is missing.
    pub fn resolution(&self) -> Resolution {
        if let Some(meta) = &self.metadata {
            return meta.resolution();
        }
        let width = self.events.iter().map(|e| e.x).max().map_or(0, |x| x.saturating_add(1));
        let height = self.events.iter().map(|e| e.y).max().map_or(0, |y| y.saturating_add(1));
        Resolution::new(width, height)
    }
}

pub fn read_recording(path: &Path) -> Result<Recording> {
    let mut reader = csv::Reader::from_path(path)?;
    let events = reader
        .deserialize::<EventRow>()
        .map(|row| row.map(Event::from))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let meta_path = metadata_path(path);
    let metadata = if meta_path.exists() {
        let text = fs::read_to_string(&meta_path)?;
        let meta = serde_yaml::from_str(&text)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", meta_path.display(), e)))?;
        Some(meta)
    } else {
        None
    };

    Ok(Recording { metadata, events })
}
