use serde::{Deserialize, Serialize};

use crate::chassis::ChassisModel;
use crate::controller::ControllerState;
use crate::error::HardwareError;
use crate::modes::{DriveModes, SpeedMode, SteeringMode};

/// Stick scaling. The divisors are tuned by feel; FAST keeps more turn
/// authority than SLOW on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Fraction of full scale below which a stick reads zero.
    pub deadband: f64,
    /// Divides every axis in SLOW mode.
    pub slow_divisor: f64,
    /// Divides the arcade turn axis in FAST mode.
    pub fast_turn_divisor: f64,
    /// Adds the right stick's X axis to the arcade turn as a trim.
    pub dual_stick_yaw: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            deadband: 0.15,
            slow_divisor: 4.0,
            fast_turn_divisor: 1.5,
            dual_stick_yaw: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveSignal {
    Arcade { forward: f64, turn: f64 },
    Tank { left: f64, right: f64 },
}

impl DriveSignal {
    /// Forwards the signal to the chassis with `deadband`.
    pub fn apply(self, chassis: &dyn ChassisModel, deadband: f64) -> Result<(), HardwareError> {
        match self {
            Self::Arcade { forward, turn } => chassis.arcade(forward, turn, deadband),
            Self::Tank { left, right } => chassis.tank(left, right, deadband),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InputMapper {
    config: InputConfig,
}

impl InputMapper {
    pub fn new(config: InputConfig) -> Self {
        Self { config }
    }

    pub fn map(&self, state: &ControllerState, modes: DriveModes) -> DriveSignal {
        let c = &self.config;
        let (scale, turn_scale) = match modes.speed {
            SpeedMode::Fast => (1.0, 1.0 / c.fast_turn_divisor),
            SpeedMode::Slow => (1.0 / c.slow_divisor, 1.0 / c.slow_divisor),
        };
        match modes.steering {
            SteeringMode::Arcade => {
                let mut turn = state.lx() * turn_scale;
                if c.dual_stick_yaw {
                    // summed, not clamped: the drive mix clamps per side
                    turn += state.rx() * turn_scale;
                }
                DriveSignal::Arcade {
                    forward: state.ly() * scale,
                    turn,
                }
            }
            SteeringMode::Tank => DriveSignal::Tank {
                left: state.ly() * scale,
                right: state.ry() * scale,
            },
        }
    }

    /// Maps `state` and drives `chassis` with the configured deadband.
    pub fn drive(
        &self,
        chassis: &dyn ChassisModel,
        state: &ControllerState,
        modes: DriveModes,
    ) -> Result<DriveSignal, HardwareError> {
        let signal = self.map(state, modes);
        signal.apply(chassis, self.config.deadband)?;
        Ok(signal)
    }
}
