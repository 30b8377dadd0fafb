pub mod bias;
pub mod config;
pub mod error;
pub mod events;
pub mod local;
pub mod processing;
pub mod recording;
pub mod sensor;
pub mod session;
pub mod utils;

pub use error::{Error, Result};
pub use events::{Event, EventBatch, Resolution};
pub use session::{Command, Session};
