use std::fmt;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::controller::{ButtonSource, Buttons};
use crate::error::HardwareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedMode {
    #[default]
    Fast,
    Slow,
}

impl SpeedMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Fast => Self::Slow,
            Self::Slow => Self::Fast,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SteeringMode {
    #[default]
    Arcade,
    Tank,
}

impl SteeringMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Arcade => Self::Tank,
            Self::Tank => Self::Arcade,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveModes {
    pub speed: SpeedMode,
    pub steering: SteeringMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    Speed(SpeedMode),
    Steering(SteeringMode),
}

impl fmt::Display for ModeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Speed(SpeedMode::Fast) => f.write_str("speed=fast"),
            Self::Speed(SpeedMode::Slow) => f.write_str("speed=slow"),
            Self::Steering(SteeringMode::Arcade) => f.write_str("steering=arcade"),
            Self::Steering(SteeringMode::Tank) => f.write_str("steering=tank"),
        }
    }
}

/// Edge tracker for one button. A press is confirmed only if the button is
/// still down after the debounce window; holding it confirms one press.
#[derive(Debug, Clone)]
pub struct ToggleButton {
    button: Buttons,
    last_confirmed: bool,
}

impl ToggleButton {
    pub fn new(button: Buttons) -> Self {
        Self {
            button,
            last_confirmed: false,
        }
    }

    /// Returns `true` on a newly confirmed press. Blocks for `debounce` when
    /// the button is first seen down; a cancelled wait confirms nothing.
    pub fn poll(
        &mut self,
        source: &mut dyn ButtonSource,
        debounce: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, HardwareError> {
        if !source.sample(self.button)? {
            self.last_confirmed = false;
            return Ok(false);
        }
        if self.last_confirmed {
            return Ok(false);
        }
        if !cancel.sleep(debounce) {
            return Ok(false);
        }
        let confirmed = source.resample(self.button)?;
        self.last_confirmed = confirmed;
        Ok(confirmed)
    }
}

/// Current drive modes plus the two buttons that rotate them.
#[derive(Debug, Clone)]
pub struct ModeStateMachine {
    modes: DriveModes,
    speed: ToggleButton,
    steering: ToggleButton,
    debounce: Duration,
}

impl ModeStateMachine {
    /// Starts in {fast, arcade} with Y toggling speed and B toggling steering.
    pub fn new(debounce: Duration) -> Self {
        Self {
            modes: DriveModes::default(),
            speed: ToggleButton::new(Buttons::Y),
            steering: ToggleButton::new(Buttons::B),
            debounce,
        }
    }

    pub fn modes(&self) -> DriveModes {
        self.modes
    }

    /// Samples both toggles, speed first. Returns the committed changes.
    pub fn tick(
        &mut self,
        source: &mut dyn ButtonSource,
        cancel: &CancelToken,
    ) -> Result<Vec<ModeChange>, HardwareError> {
        let mut changes = Vec::new();
        if self.speed.poll(source, self.debounce, cancel)? {
            self.modes.speed = self.modes.speed.toggled();
            changes.push(ModeChange::Speed(self.modes.speed));
        }
        if self.steering.poll(source, self.debounce, cancel)? {
            self.modes.steering = self.modes.steering.toggled();
            changes.push(ModeChange::Steering(self.modes.steering));
        }
        Ok(changes)
    }
}
