use std::path::Path;

use tracing::info;

use super::{SensorDriver, SensorSession};
use crate::bias::{BiasChannel, BiasValue};
use crate::error::{Error, Result};
use crate::events::{Event, EventBatch, FrameImage, Resolution};
use crate::recording::read_recording;

/// Opens CSV recordings as if they were sensors. The "serial" passed to
/// `open` is the recording path.
pub struct PlaybackDriver {
    slice_us: i64,
}

impl PlaybackDriver {
    /// Every poll hands out `slice_us` of sensor time.
    pub fn new(slice_us: i64) -> Self {
        Self {
            slice_us: slice_us.max(1),
        }
    }
}

impl Default for PlaybackDriver {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl SensorDriver for PlaybackDriver {
    fn open(&self, serial: &str) -> Result<Box<dyn SensorSession>> {
        let path = Path::new(serial);
        let recording =
            read_recording(path).map_err(|e| Error::sensor(serial, format!("cannot read recording: {}", e)))?;
        let resolution = recording.resolution();
        let name = match &recording.metadata {
            Some(meta) => meta.serial.clone(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| serial.to_string()),
        };
        info!(serial = %name, events = recording.events.len(), "opened recording");
        Ok(Box::new(PlaybackSensor::new(
            &name,
            resolution,
            recording.events,
            self.slice_us,
        )))
    }
}

/// Replays a fixed event sequence in sensor-time slices. Bias registers are
/// held locally so the bias commands behave as on live hardware.
pub struct PlaybackSensor {
    serial: String,
    resolution: Resolution,
    events: Vec<Event>,
    cursor: usize,
    slice_us: i64,
    slice_end: Option<i64>,
    biases: [BiasValue; 6],
    events_enabled: bool,
    closed: bool,
}

impl PlaybackSensor {
    pub fn new(serial: &str, resolution: Resolution, mut events: Vec<Event>, slice_us: i64) -> Self {
        // Batches must be time-ordered; recordings stitched from several
        // sources may not be.
        events.sort_by_key(|e| e.timestamp);
        Self {
            serial: serial.to_string(),
            resolution,
            events,
            cursor: 0,
            slice_us: slice_us.max(1),
            slice_end: None,
            biases: [BiasValue::default(); 6],
            events_enabled: false,
            closed: false,
        }
    }

    fn slot(channel: BiasChannel) -> usize {
        BiasChannel::ALL
            .iter()
            .position(|&c| c == channel)
            .unwrap_or_default()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::sensor(&self.serial, "recording closed"));
        }
        Ok(())
    }
}

impl SensorSession for PlaybackSensor {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn enable_frames(&mut self, _enabled: bool) -> Result<()> {
        // Recordings carry no frames.
        self.check_open()
    }

    fn enable_events(&mut self, enabled: bool) -> Result<()> {
        self.check_open()?;
        self.events_enabled = enabled;
        Ok(())
    }

    fn poll_frame(&mut self) -> Result<Option<FrameImage>> {
        self.check_open()?;
        Ok(None)
    }

    fn poll_event_batch(&mut self) -> Result<Option<EventBatch>> {
        self.check_open()?;
        if !self.events_enabled || self.is_finished() {
            return Ok(None);
        }
        let first = self.events[self.cursor].timestamp;
        let end = self.slice_end.unwrap_or(first) + self.slice_us;
        self.slice_end = Some(end);

        let remaining = &self.events[self.cursor..];
        let take = remaining.partition_point(|e| e.timestamp < end);
        self.cursor += take;
        if take == 0 {
            return Ok(None);
        }
        Ok(Some(remaining[..take].iter().copied().collect()))
    }

    fn bias(&self, channel: BiasChannel) -> Result<BiasValue> {
        self.check_open()?;
        Ok(self.biases[Self::slot(channel)])
    }

    fn set_bias(&mut self, channel: BiasChannel, value: BiasValue) -> Result<()> {
        self.check_open()?;
        self.bias_range(channel)
            .validate(channel, value.coarse as u32, value.fine as u32)?;
        self.biases[Self::slot(channel)] = value;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.cursor >= self.events.len()
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{CsvSinkOpener, SinkOpener};

    fn events(ts: &[i64]) -> Vec<Event> {
        ts.iter().map(|&t| Event::new(t, 0, 0, true)).collect()
    }

    #[test]
    fn test_slices_cover_recording_once() {
        let mut sensor = PlaybackSensor::new("REC", Resolution::new(4, 4), events(&[0, 5, 9, 10, 31]), 10);
        sensor.enable_events(true).unwrap();

        let a = sensor.poll_event_batch().unwrap().unwrap();
        assert_eq!(a.timestamps(), &[0, 5, 9]);
        let b = sensor.poll_event_batch().unwrap().unwrap();
        assert_eq!(b.timestamps(), &[10]);
        // [20, 30) is empty: nothing this tick, not finished yet.
        assert!(sensor.poll_event_batch().unwrap().is_none());
        assert!(!sensor.is_finished());
        let d = sensor.poll_event_batch().unwrap().unwrap();
        assert_eq!(d.timestamps(), &[31]);
        assert!(sensor.is_finished());
        assert!(sensor.poll_event_batch().unwrap().is_none());
    }

    #[test]
    fn test_unsorted_input_is_ordered() {
        let mut sensor = PlaybackSensor::new("REC", Resolution::new(4, 4), events(&[7, 3, 5]), 100);
        sensor.enable_events(true).unwrap();
        let batch = sensor.poll_event_batch().unwrap().unwrap();
        assert_eq!(batch.timestamps(), &[3, 5, 7]);
    }

    #[test]
    fn test_driver_opens_csv_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.csv");
        let mut sink = CsvSinkOpener
            .open(&path, "00000591", Resolution::new(346, 260))
            .unwrap();
        sink.append(&events(&[1, 2, 3]).into_iter().collect()).unwrap();
        sink.finish().unwrap();

        let sensor = PlaybackDriver::default()
            .open(path.to_str().unwrap())
            .unwrap();
        assert_eq!(sensor.serial(), "00000591");
        assert_eq!(sensor.resolution(), Resolution::new(346, 260));
    }

    #[test]
    fn test_missing_recording_is_unavailable() {
        let result = PlaybackDriver::default().open("/nonexistent/rec.csv");
        assert!(matches!(result, Err(Error::SensorUnavailable { .. })));
    }
}
