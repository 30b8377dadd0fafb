use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::events::Event;
use crate::recording::csv_sink::EventRow;

/// Row range and time cut for the offline filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineWindow {
    /// First data row (0 = first row after the header).
    pub start_index: usize,
    pub max_rows: usize,
    /// Keep rows with `timestamp - timestamp[start_index] <= threshold_us`.
    pub threshold_us: i64,
}

/// An event kept by the offline filter, with its offset from the first row
/// of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowedEvent {
    pub event: Event,
    pub dt: i64,
}

#[derive(Serialize)]
struct OfflineRow {
    timestamp: i64,
    x: u16,
    y: u16,
    polarity: u8,
    dt: i64,
}

// -----------------------------------------------------------------------------
// BOUNDED-RANGE THRESHOLD FILTER
// -----------------------------------------------------------------------------

/// Pure version over an in-memory sequence.
pub fn select_window(events: &[Event], window: OfflineWindow) -> Vec<WindowedEvent> {
    let rows = events.iter().skip(window.start_index).take(window.max_rows).copied();
    threshold(rows, window.threshold_us)
}

fn threshold(rows: impl Iterator<Item = Event>, threshold_us: i64) -> Vec<WindowedEvent> {
    let mut rows = rows.peekable();
    let Some(t0) = rows.peek().map(|e| e.timestamp) else {
        return Vec::new();
    };
    rows.map(|event| WindowedEvent {
        event,
        dt: event.timestamp.saturating_sub(t0),
    })
    .filter(|w| w.dt <= threshold_us)
    .collect()
}

/// Streams `path`. Rows before the window are read as raw records and never
/// deserialized; only the rows of the window are parsed into events.
pub fn load_and_filter(path: &Path, window: OfflineWindow) -> Result<Vec<WindowedEvent>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let rows = reader
        .records()
        .skip(window.start_index)
        .take(window.max_rows)
        .map(|record| {
            record
                .and_then(|r| r.deserialize::<EventRow>(Some(&headers)))
                .map(Event::from)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(threshold(rows.into_iter(), window.threshold_us))
}

pub fn write_events(path: &Path, events: &[WindowedEvent]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for w in events {
        writer.serialize(OfflineRow {
            timestamp: w.event.timestamp,
            x: w.event.x,
            y: w.event.y,
            polarity: w.event.polarity as u8,
            dt: w.dt,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn run(input: &Path, window: OfflineWindow, output: Option<&Path>) -> Result<Vec<WindowedEvent>> {
    let start = Instant::now();
    let selected = load_and_filter(input, window)?;
    info!(
        input = %input.display(),
        start_index = window.start_index,
        max_rows = window.max_rows,
        threshold_us = window.threshold_us,
        kept = selected.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "offline filter done"
    );
    if let Some(output) = output {
        write_events(output, &selected)?;
        info!(output = %output.display(), "offline selection written");
    }
    Ok(selected)
}
