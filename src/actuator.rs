use serde::{Deserialize, Serialize};

use crate::brain::{BrakeMode, EncoderUnits, Gearset, SharedBrain};
use crate::error::HardwareError;

/// Wiring of one smart motor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorConfig {
    pub port: u8,
    #[serde(default)]
    pub reversed: bool,
    #[serde(default)]
    pub gearset: Gearset,
    #[serde(default)]
    pub encoder_units: EncoderUnits,
}

impl MotorConfig {
    pub fn new(port: u8, reversed: bool) -> Self {
        Self {
            port,
            reversed,
            gearset: Gearset::default(),
            encoder_units: EncoderUnits::default(),
        }
    }
    pub fn with_gearset(mut self, gearset: Gearset) -> Self {
        self.gearset = gearset;
        self
    }
}

/// Handle over a single motor port.
#[derive(Clone)]
pub struct Actuator {
    config: MotorConfig,
    brain: SharedBrain,
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator").field("config", &self.config).finish()
    }
}

impl Actuator {
    pub fn new(config: MotorConfig, brain: SharedBrain) -> Self {
        Self { config, brain }
    }
    pub fn max_rpm(&self) -> f64 {
        self.config.gearset.max_rpm()
    }
    fn sign(&self) -> f64 {
        if self.config.reversed {
            -1.0
        } else {
            1.0
        }
    }
    /// Commands a velocity in rpm, clamped to what the gearset can do.
    pub fn move_velocity(&self, rpm: f64) -> Result<(), HardwareError> {
        let rpm = rpm.clamp(-self.max_rpm(), self.max_rpm()) * self.sign();
        self.brain.lock().set_velocity(self.config.port, rpm)
    }
    /// Commands a fraction of the gearset's top speed.
    pub fn move_normalised(&self, power: f64) -> Result<(), HardwareError> {
        self.move_velocity(power * self.max_rpm())
    }
    pub fn stop(&self) -> Result<(), HardwareError> {
        self.move_velocity(0.0)
    }
    pub fn set_brake_mode(&self, mode: BrakeMode) -> Result<(), HardwareError> {
        self.brain.lock().set_brake_mode(self.config.port, mode)
    }
    pub fn position_degrees(&self) -> Result<f64, HardwareError> {
        Ok(self.brain.lock().position(self.config.port)? * self.sign())
    }
    /// Position in the configured encoder units.
    pub fn position(&self) -> Result<f64, HardwareError> {
        let degrees = self.position_degrees()?;
        Ok(self
            .config
            .encoder_units
            .from_degrees(degrees, self.config.gearset))
    }
}
