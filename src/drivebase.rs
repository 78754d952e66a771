use std::f64::consts::PI;

use crate::actuator::Actuator;
use crate::brain::BrakeMode;
use crate::error::HardwareError;
use crate::units::Length;

/// Zeroes any input whose magnitude is below `deadband`.
pub fn apply_deadband(x: f64, deadband: f64) -> f64 {
    if x.abs() < deadband {
        0.0
    } else {
        x
    }
}

/// Mixes forward/turn into (left, right). Each side is clamped on its own, not
/// rescaled, so a saturated command keeps its forward component and loses turn.
pub fn arcade_mix(forward: f64, turn: f64) -> (f64, f64) {
    (
        (forward + turn).clamp(-1.0, 1.0),
        (forward - turn).clamp(-1.0, 1.0),
    )
}

pub fn tank_mix(left: f64, right: f64) -> (f64, f64) {
    (left, right)
}

/// Left and right motor groups of a skid-steer drive.
#[derive(Debug, Clone)]
pub struct Drivebase {
    left: Vec<Actuator>,
    right: Vec<Actuator>,
    brake_mode: BrakeMode,
    mm_per_degree: f64,
}

impl Drivebase {
    pub fn new(left: Vec<Actuator>, right: Vec<Actuator>, wheel_diameter: Length) -> Self {
        Self {
            left,
            right,
            brake_mode: BrakeMode::default(),
            mm_per_degree: PI * wheel_diameter.as_mm() / 360.0,
        }
    }

    fn motors(&self) -> impl Iterator<Item = &Actuator> {
        self.left.iter().chain(self.right.iter())
    }

    /// Slowest top speed across the drive, in rpm.
    pub fn max_rpm(&self) -> f64 {
        self.motors()
            .map(Actuator::max_rpm)
            .fold(f64::INFINITY, f64::min)
    }

    /// Writes normalised powers to both sides. Every motor is written even if
    /// an earlier one fails; the first failure is returned.
    pub fn write_powers(&self, left: f64, right: f64) -> Result<(), HardwareError> {
        let mut first_err = None;
        let writes = self
            .left
            .iter()
            .map(|m| (m, left))
            .chain(self.right.iter().map(|m| (m, right)));
        for (motor, power) in writes {
            if let Err(e) = motor.move_normalised(power.clamp(-1.0, 1.0)) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn arcade(&self, forward: f64, turn: f64, deadband: f64) -> Result<(), HardwareError> {
        let (left, right) = arcade_mix(
            apply_deadband(forward, deadband),
            apply_deadband(turn, deadband),
        );
        self.write_powers(left, right)
    }

    pub fn tank(&self, left: f64, right: f64, deadband: f64) -> Result<(), HardwareError> {
        let (left, right) = tank_mix(apply_deadband(left, deadband), apply_deadband(right, deadband));
        self.write_powers(left, right)
    }

    pub fn stop(&self) -> Result<(), HardwareError> {
        self.write_powers(0.0, 0.0)
    }

    pub fn brake_mode(&self) -> BrakeMode {
        self.brake_mode
    }

    pub fn set_brake_mode(&mut self, mode: BrakeMode) -> Result<(), HardwareError> {
        self.brake_mode = mode;
        let mut first_err = None;
        for motor in self.motors() {
            if let Err(e) = motor.set_brake_mode(mode) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Cumulative distance travelled by each side in millimetres, averaged
    /// over the motors of that side.
    pub fn side_distances(&self) -> Result<(f64, f64), HardwareError> {
        let side = |motors: &[Actuator]| -> Result<f64, HardwareError> {
            let mut sum = 0.0;
            for motor in motors {
                sum += motor.position_degrees()?;
            }
            Ok(sum / motors.len().max(1) as f64 * self.mm_per_degree)
        };
        Ok((side(&self.left)?, side(&self.right)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::MotorConfig;
    use crate::brain::SharedBrain;
    use crate::sim::SimBrain;
    use approx::assert_abs_diff_eq;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn drive() -> (Arc<Mutex<SimBrain>>, Drivebase) {
        let sim = Arc::new(Mutex::new(SimBrain::default()));
        let brain: SharedBrain = sim.clone();
        let left = vec![
            Actuator::new(MotorConfig::new(12, false), brain.clone()),
            Actuator::new(MotorConfig::new(13, false), brain.clone()),
        ];
        let right = vec![
            Actuator::new(MotorConfig::new(18, true), brain.clone()),
            Actuator::new(MotorConfig::new(19, true), brain),
        ];
        (sim, Drivebase::new(left, right, Length::inches(3.5)))
    }

    #[test]
    fn deadband_inputs_mix_like_zero() {
        let deadband = 0.15;
        for x in [-0.149, -0.1, -0.01, 0.0, 0.05, 0.1499] {
            for other in [-1.0, -0.4, 0.0, 0.3, 1.0] {
                assert_eq!(
                    arcade_mix(apply_deadband(x, deadband), other),
                    arcade_mix(0.0, other)
                );
                assert_eq!(
                    arcade_mix(other, apply_deadband(x, deadband)),
                    arcade_mix(other, 0.0)
                );
            }
        }
        assert_eq!(apply_deadband(0.15, deadband), 0.15);
        assert_eq!(apply_deadband(-0.5, deadband), -0.5);
    }

    #[test]
    fn arcade_mix_clamps_each_side() {
        let steps = [-1.0, -0.75, -0.5, -0.2, 0.0, 0.3, 0.6, 0.9, 1.0];
        for forward in steps {
            for turn in steps {
                let (l, r) = arcade_mix(forward, turn);
                assert!((-1.0..=1.0).contains(&l));
                assert!((-1.0..=1.0).contains(&r));
                assert_eq!(l, (forward + turn).clamp(-1.0, 1.0));
                assert_eq!(r, (forward - turn).clamp(-1.0, 1.0));
            }
        }
        // clamping, not renormalising: the inside wheel keeps its share
        assert_eq!(arcade_mix(1.0, 0.5), (1.0, 0.5));
    }

    #[test]
    fn tank_mix_is_identity() {
        assert_eq!(tank_mix(0.3, -0.7), (0.3, -0.7));
    }

    #[test]
    fn arcade_writes_reversed_right_side() {
        let (sim, drive) = drive();
        drive.arcade(0.5, 0.0, 0.15).unwrap();
        let sim = sim.lock();
        assert_abs_diff_eq!(sim.commanded_velocity(12), 100.0);
        assert_abs_diff_eq!(sim.commanded_velocity(13), 100.0);
        assert_abs_diff_eq!(sim.commanded_velocity(18), -100.0);
        assert_abs_diff_eq!(sim.commanded_velocity(19), -100.0);
    }

    #[test]
    fn failing_motor_does_not_block_the_rest() {
        let (sim, drive) = drive();
        sim.lock().disconnect(13);
        let err = drive.tank(1.0, 1.0, 0.0).unwrap_err();
        assert_eq!(err, HardwareError::Disconnected { port: 13 });
        assert_abs_diff_eq!(sim.lock().commanded_velocity(12), 200.0);
        assert_abs_diff_eq!(sim.lock().commanded_velocity(19), -200.0);
    }

    #[test]
    fn side_distances_follow_wheel_circumference() {
        let (sim, drive) = drive();
        {
            let mut sim = sim.lock();
            for port in [12, 13] {
                sim.set_position(port, 360.0);
            }
            for port in [18, 19] {
                sim.set_position(port, -720.0);
            }
        }
        let (l, r) = drive.side_distances().unwrap();
        let circumference = PI * Length::inches(3.5).as_mm();
        assert_abs_diff_eq!(l, circumference, epsilon = 1e-9);
        assert_abs_diff_eq!(r, 2.0 * circumference, epsilon = 1e-9);
    }

    #[test]
    fn brake_mode_reaches_every_motor() {
        let (sim, mut drive) = drive();
        drive.set_brake_mode(BrakeMode::Hold).unwrap();
        assert_eq!(drive.brake_mode(), BrakeMode::Hold);
        for port in [12, 13, 18, 19] {
            assert_eq!(sim.lock().brake_mode(port), BrakeMode::Hold);
        }
    }
}
