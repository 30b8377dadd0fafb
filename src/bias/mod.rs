use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The six DAVIS346 coarse/fine bias registers this tool drives. The set is
/// closed; nothing is discovered from the device at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasChannel {
    Photoreceptor,
    PhotoreceptorSourceFollower,
    Diff,
    On,
    Off,
    Refractory,
}

impl BiasChannel {
    pub const ALL: [BiasChannel; 6] = [
        BiasChannel::Photoreceptor,
        BiasChannel::PhotoreceptorSourceFollower,
        BiasChannel::Diff,
        BiasChannel::On,
        BiasChannel::Off,
        BiasChannel::Refractory,
    ];

    /// Operator-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            BiasChannel::Photoreceptor => "Photoreceptor",
            BiasChannel::PhotoreceptorSourceFollower => "SourceFollower",
            BiasChannel::Diff => "Diff",
            BiasChannel::On => "OnThreshold",
            BiasChannel::Off => "OffThreshold",
            BiasChannel::Refractory => "Refractory",
        }
    }
}

impl fmt::Display for BiasChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BiasChannel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let channel = match s.to_ascii_lowercase().as_str() {
            "photoreceptor" | "pr" => BiasChannel::Photoreceptor,
            "photoreceptor_source_follower" | "sourcefollower" | "source_follower" | "sf" => {
                BiasChannel::PhotoreceptorSourceFollower
            }
            "diff" => BiasChannel::Diff,
            "on" | "onthreshold" | "on_threshold" => BiasChannel::On,
            "off" | "offthreshold" | "off_threshold" => BiasChannel::Off,
            "refractory" | "refr" => BiasChannel::Refractory,
            other => return Err(Error::Config(format!("unknown bias channel '{}'", other))),
        };
        Ok(channel)
    }
}

// BIAS VALUE ------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BiasValue {
    pub coarse: u8,
    pub fine: u8,
}

impl BiasValue {
    pub fn new(coarse: u8, fine: u8) -> Self {
        Self { coarse, fine }
    }
}

impl fmt::Display for BiasValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coarse={:3}, fine={:3}", self.coarse, self.fine)
    }
}

/// Register widths of one channel, as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiasRange {
    pub max_coarse: u8,
    pub max_fine: u8,
}

impl BiasRange {
    /// DAVIS346 coarse/fine registers: 3-bit coarse, 8-bit fine.
    pub const DAVIS346: BiasRange = BiasRange {
        max_coarse: 7,
        max_fine: 255,
    };

    /// Rejects values outside the register width. User-set values are
    /// never clamped.
    pub fn validate(&self, channel: BiasChannel, coarse: u32, fine: u32) -> Result<BiasValue> {
        if coarse > self.max_coarse as u32 || fine > self.max_fine as u32 {
            return Err(Error::InvalidBiasValue {
                channel,
                coarse,
                fine,
                max_coarse: self.max_coarse,
                max_fine: self.max_fine,
            });
        }
        Ok(BiasValue::new(coarse as u8, fine as u8))
    }
}

// MANUAL TUNING COMMAND -------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiasField {
    Coarse,
    Fine,
}

/// One manual edit of one half of a channel's register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiasCommand {
    pub channel: BiasChannel,
    pub field: BiasField,
    pub value: u32,
}

impl BiasCommand {
    /// Full `(coarse, fine)` pair this command asks for, keeping the other
    /// half of `current`.
    pub fn resolve(&self, current: BiasValue) -> (u32, u32) {
        match self.field {
            BiasField::Coarse => (self.value, current.fine as u32),
            BiasField::Fine => (current.coarse as u32, self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parse_aliases() {
        assert_eq!("on".parse::<BiasChannel>().unwrap(), BiasChannel::On);
        assert_eq!(
            "SourceFollower".parse::<BiasChannel>().unwrap(),
            BiasChannel::PhotoreceptorSourceFollower
        );
        assert_eq!("refr".parse::<BiasChannel>().unwrap(), BiasChannel::Refractory);
        assert!("gain".parse::<BiasChannel>().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let range = BiasRange::DAVIS346;
        assert_eq!(
            range.validate(BiasChannel::On, 7, 255).unwrap(),
            BiasValue::new(7, 255)
        );
        match range.validate(BiasChannel::On, 8, 10) {
            Err(Error::InvalidBiasValue { coarse, max_coarse, .. }) => {
                assert_eq!(coarse, 8);
                assert_eq!(max_coarse, 7);
            }
            other => panic!("expected InvalidBiasValue, got {:?}", other),
        }
        assert!(range.validate(BiasChannel::Diff, 3, 256).is_err());
    }

    #[test]
    fn test_command_keeps_other_half() {
        let current = BiasValue::new(4, 120);
        let coarse = BiasCommand {
            channel: BiasChannel::Off,
            field: BiasField::Coarse,
            value: 6,
        };
        let fine = BiasCommand {
            channel: BiasChannel::Off,
            field: BiasField::Fine,
            value: 33,
        };
        assert_eq!(coarse.resolve(current), (6, 120));
        assert_eq!(fine.resolve(current), (4, 33));
    }
}
