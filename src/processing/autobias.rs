use tracing::debug;

use crate::bias::{BiasChannel, BiasValue};
use crate::config::AutobiasConfig;

/// Hysteresis counters plus the coarse value the controller believes is on
/// the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerState {
    pub low_count: u32,
    pub high_count: u32,
    pub current_coarse: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    /// Scene too dark: lower coarse, more sensitive.
    Down,
    /// Scene too bright: raise coarse, less sensitive.
    Up,
}

/// One coarse step the session must write to every sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasStep {
    pub channel: BiasChannel,
    pub direction: StepDirection,
    pub from: u8,
    pub value: BiasValue,
    pub rate: f64,
}

// -----------------------------------------------------------------------------
// BIAS CONTROLLER
// -----------------------------------------------------------------------------

/// Closed-loop coarse-bias controller.
///
/// Needs `hysteresis_count` consecutive readings on the same side of the dead
/// band before stepping, moves one coarse unit per decision and never leaves
/// `[min_coarse, max_coarse]`. An in-band reading clears both counters.
pub struct BiasController {
    channel: BiasChannel,
    low_rate_threshold: f64,
    high_rate_threshold: f64,
    hysteresis_count: u32,
    min_coarse: u8,
    max_coarse: u8,
    fine: u8,
    state: ControllerState,
}

impl BiasController {
    /// `device_max_coarse` is the register width of the controlled channel;
    /// the soft ceiling is the lower of it and `config.max_coarse`.
    pub fn new(config: &AutobiasConfig, initial: BiasValue, device_max_coarse: u8) -> Self {
        Self {
            channel: config.channel,
            low_rate_threshold: config.low_rate_threshold,
            high_rate_threshold: config.high_rate_threshold,
            hysteresis_count: config.hysteresis_count.max(1),
            min_coarse: config.min_coarse,
            max_coarse: config.max_coarse.min(device_max_coarse),
            fine: initial.fine,
            state: ControllerState {
                low_count: 0,
                high_count: 0,
                current_coarse: initial.coarse,
            },
        }
    }

    pub fn channel(&self) -> BiasChannel {
        self.channel
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn current(&self) -> BiasValue {
        BiasValue::new(self.state.current_coarse, self.fine)
    }

    /// Adopts a manually written value for the controlled channel. Counters
    /// are left alone.
    pub fn sync(&mut self, value: BiasValue) {
        self.state.current_coarse = value.coarse;
        self.fine = value.fine;
    }

    /// Feeds one rate reading. Returns the step to apply, if any.
    pub fn observe(&mut self, rate: f64) -> Option<BiasStep> {
        let state = &mut self.state;
        let from = state.current_coarse;

        let direction = if rate < self.low_rate_threshold {
            state.low_count += 1;
            state.high_count = 0;
            if state.low_count >= self.hysteresis_count && from > self.min_coarse {
                state.current_coarse = from - 1;
                state.low_count = 0;
                Some(StepDirection::Down)
            } else {
                None
            }
        } else if rate > self.high_rate_threshold {
            state.high_count += 1;
            state.low_count = 0;
            if state.high_count >= self.hysteresis_count && from < self.max_coarse {
                state.current_coarse = from + 1;
                state.high_count = 0;
                Some(StepDirection::Up)
            } else {
                None
            }
        } else {
            state.low_count = 0;
            state.high_count = 0;
            None
        };

        debug!(
            rate,
            coarse = state.current_coarse,
            low_count = state.low_count,
            high_count = state.high_count,
            "autobias reading"
        );

        direction.map(|direction| BiasStep {
            channel: self.channel,
            direction,
            from,
            value: BiasValue::new(self.state.current_coarse, self.fine),
            rate,
        })
    }
}
