use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::controller::ControllerState;
use crate::error::HardwareError;

pub const PORT_RANGE: std::ops::RangeInclusive<u8> = 1..=21;

/// What a motor does when commanded to zero velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrakeMode {
    #[default]
    Coast,
    Brake,
    Hold,
}

/// Motor cartridge. Determines top speed and encoder resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gearset {
    Red,
    #[default]
    Green,
    Blue,
}

impl Gearset {
    pub fn max_rpm(self) -> f64 {
        match self {
            Self::Red => 100.0,
            Self::Green => 200.0,
            Self::Blue => 600.0,
        }
    }
    pub fn counts_per_rev(self) -> f64 {
        match self {
            Self::Red => 1800.0,
            Self::Green => 900.0,
            Self::Blue => 300.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderUnits {
    #[default]
    Degrees,
    Rotations,
    Counts,
}

impl EncoderUnits {
    pub fn from_degrees(self, degrees: f64, gearset: Gearset) -> f64 {
        match self {
            Self::Degrees => degrees,
            Self::Rotations => degrees / 360.0,
            Self::Counts => degrees / 360.0 * gearset.counts_per_rev(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatteryInfo {
    pub voltage: f64,
    pub capacity: f64,
    pub temperature: f64,
}

pub trait Brain: Send {
    /// Exchanges one packet with the brain. On the simulator this advances
    /// the plant by one step.
    fn update(&mut self) -> Result<(), HardwareError>;
    /// Commands a raw (unreversed) velocity in rpm.
    fn set_velocity(&mut self, port: u8, rpm: f64) -> Result<(), HardwareError>;
    fn set_brake_mode(&mut self, port: u8, mode: BrakeMode) -> Result<(), HardwareError>;
    /// Raw cumulative encoder position in degrees of the output shaft.
    fn position(&mut self, port: u8) -> Result<f64, HardwareError>;
    fn controller(&mut self) -> Result<ControllerState, HardwareError>;
    fn battery(&mut self) -> Result<BatteryInfo, HardwareError>;
}

pub type SharedBrain = Arc<Mutex<dyn Brain>>;

/// Logs the first failure of a streak, then stays quiet until a success.
#[derive(Debug, Default)]
pub struct FaultLatch {
    failing: bool,
}

impl FaultLatch {
    pub fn observe<T>(&mut self, what: &str, result: Result<T, HardwareError>) -> Option<T> {
        match result {
            Ok(v) => {
                if self.failing {
                    log::info!(target: "hardware", "{what} recovered");
                }
                self.failing = false;
                Some(v)
            }
            Err(e) => {
                if !self.failing {
                    log::warn!(target: "hardware", "{what} failed: {e}");
                    self.failing = true;
                }
                None
            }
        }
    }
    pub fn is_failing(&self) -> bool {
        self.failing
    }
}
