use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::actuator::MotorConfig;
use crate::autonomous::ImplementsConfig;
use crate::brain::{Gearset, SharedBrain, PORT_RANGE};
use crate::chassis::ChassisBuilder;
use crate::error::ConfigError;
use crate::logging::{EventLog, LogConfig};
use crate::motion::MotionSettings;
use crate::robot::TeleopConfig;
use crate::units::Length;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChassisConfig {
    pub left: Vec<MotorConfig>,
    pub right: Vec<MotorConfig>,
    /// Cartridge of every drive motor; overrides the per-motor setting.
    pub gearset: Gearset,
    pub wheel_diameter: Length,
    pub track_width: Length,
}

impl Default for ChassisConfig {
    fn default() -> Self {
        Self {
            left: vec![MotorConfig::new(12, false), MotorConfig::new(13, false)],
            right: vec![MotorConfig::new(18, true), MotorConfig::new(19, true)],
            gearset: Gearset::Green,
            wheel_diameter: Length::inches(3.5),
            track_width: Length::inches(6.5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub logging: LogConfig,
    pub chassis: ChassisConfig,
    pub motion: MotionSettings,
    pub teleop: TeleopConfig,
    pub implements: ImplementsConfig,
}

impl RobotConfig {
    /// Reads, parses and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        log::debug!(target: "config", "loaded {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));
        let c = &self.chassis;

        if c.left.is_empty() || c.right.is_empty() {
            return invalid("chassis needs at least one motor per side".into());
        }
        let mut seen = HashSet::new();
        let motors = c
            .left
            .iter()
            .chain(&c.right)
            .chain([&self.implements.intake, &self.implements.roller]);
        for m in motors {
            if !PORT_RANGE.contains(&m.port) {
                return invalid(format!(
                    "port {} is outside {}..={}",
                    m.port,
                    PORT_RANGE.start(),
                    PORT_RANGE.end()
                ));
            }
            if !seen.insert(m.port) {
                return invalid(format!("port {} is assigned twice", m.port));
            }
        }
        if c.wheel_diameter.as_mm() <= 0.0 || c.track_width.as_mm() <= 0.0 {
            return invalid("wheel diameter and track width must be positive".into());
        }

        let m = &self.motion;
        if m.distance_tolerance.as_mm() <= 0.0 || m.angle_tolerance <= 0.0 {
            return invalid("motion tolerances must be positive".into());
        }
        if m.max_ticks == 0 || m.tick_ms == 0 {
            return invalid("motion max_ticks and tick_ms must be non-zero".into());
        }
        if m.distance_kp <= 0.0 || m.turn_kp <= 0.0 || m.heading_kp < 0.0 {
            return invalid("motion gains must be positive".into());
        }

        let t = &self.teleop;
        if t.tick_ms == 0 {
            return invalid("teleop tick_ms must be non-zero".into());
        }
        if !(0.0..1.0).contains(&t.input.deadband) {
            return invalid(format!("deadband {} is outside [0, 1)", t.input.deadband));
        }
        if t.input.slow_divisor <= 0.0 || t.input.fast_turn_divisor <= 0.0 {
            return invalid("teleop divisors must be positive".into());
        }
        Ok(())
    }

    pub fn events(&self) -> EventLog {
        EventLog::new(self.logging.competition)
    }

    /// Builder for the drive described by `[chassis]` and `[motion]`.
    pub fn chassis_builder(&self, brain: SharedBrain) -> ChassisBuilder {
        let c = &self.chassis;
        ChassisBuilder::new(brain)
            .with_motors(&c.left, &c.right)
            .with_dimensions(c.gearset, c.wheel_diameter, c.track_width)
            .with_motion(self.motion)
            .with_events(self.events())
    }
}
