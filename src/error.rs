use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::bias::BiasChannel;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Device open/poll/register failure. Fatal for that sensor only.
    #[error("sensor {serial} unavailable: {reason}")]
    SensorUnavailable { serial: String, reason: String },

    /// An event addressed a pixel outside the sensor resolution. `x`/`y` are
    /// the first offending event, `rejected` counts all of them in the batch.
    #[error("event at ({x}, {y}) outside {width}x{height} sensor ({rejected} rejected)")]
    OutOfBounds {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        rejected: usize,
    },

    #[error(
        "invalid {channel} bias coarse={coarse} fine={fine} (coarse 0..={max_coarse}, fine 0..={max_fine})"
    )]
    InvalidBiasValue {
        channel: BiasChannel,
        coarse: u32,
        fine: u32,
        max_coarse: u8,
        max_fine: u8,
    },

    #[error("failed to write events to {}: {source}", path.display())]
    SinkWriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Operator input that does not parse as a command.
    #[error("invalid command '{0}'")]
    InvalidCommand(String),

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    pub fn sensor(serial: impl Into<String>, reason: impl ToString) -> Self {
        Error::SensorUnavailable {
            serial: serial.into(),
            reason: reason.to_string(),
        }
    }
}
