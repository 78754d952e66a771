use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::autonomous::{ImplementId, Implements, ImplementsConfig, Routine, Sequencer};
use crate::brain::{BrakeMode, FaultLatch, SharedBrain};
use crate::cancel::CancelToken;
use crate::chassis::MotionExecutor;
use crate::controller::{Buttons, ControllerState, TickInput};
use crate::display::{Display, LogDisplay, RobotStatus, Telemetry};
use crate::error::HardwareError;
use crate::input::{InputConfig, InputMapper};
use crate::logging::{EventLog, RobotEvent};
use crate::modes::{DriveModes, ModeStateMachine, ToggleButton};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeleopConfig {
    pub tick_ms: u64,
    pub debounce_ms: u64,
    /// Ticks between telemetry snapshots.
    pub telemetry_period: u32,
    /// Drive brake mode applied when the loop starts.
    pub brake_mode: BrakeMode,
    /// Routine started by the `A` button.
    pub routine: Routine,
    #[serde(flatten)]
    pub input: InputConfig,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            debounce_ms: 50,
            telemetry_period: 25,
            brake_mode: BrakeMode::Hold,
            routine: Routine::Simple,
            input: InputConfig::default(),
        }
    }
}

impl TeleopConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug)]
pub enum RobotState {
    Teleop,
    Autonomous(Sequencer),
}

/// Per-source latches so a dead link logs once instead of every tick.
#[derive(Debug, Default)]
struct Faults {
    link: FaultLatch,
    controller: FaultLatch,
    drive: FaultLatch,
    implements: FaultLatch,
    odometry: FaultLatch,
    battery: FaultLatch,
}

impl Faults {
    fn any(&self) -> bool {
        [
            &self.link,
            &self.controller,
            &self.drive,
            &self.implements,
            &self.odometry,
            &self.battery,
        ]
        .iter()
        .any(|l| l.is_failing())
    }
}

pub struct Robot<C: MotionExecutor> {
    brain: SharedBrain,
    chassis: C,
    implements: Implements,
    implements_config: ImplementsConfig,
    config: TeleopConfig,
    modes: ModeStateMachine,
    auton_button: ToggleButton,
    input: InputMapper,
    display: Box<dyn Display>,
    events: EventLog,
    state: RobotState,
    faults: Faults,
    ticks: u64,
    cancel: CancelToken,
}

impl<C: MotionExecutor> Robot<C> {
    pub fn new(
        brain: SharedBrain,
        mut chassis: C,
        implements: &ImplementsConfig,
        config: TeleopConfig,
        events: EventLog,
    ) -> Self {
        if let Err(e) = chassis.set_brake_mode(config.brake_mode) {
            log::warn!(target: "hardware", "could not set drive brake mode: {e}");
        }
        Self {
            implements: Implements::new(implements, brain.clone()),
            implements_config: *implements,
            brain,
            chassis,
            modes: ModeStateMachine::new(config.debounce()),
            auton_button: ToggleButton::new(Buttons::A),
            input: InputMapper::new(config.input),
            display: Box::new(LogDisplay),
            events,
            state: RobotState::Teleop,
            faults: Faults::default(),
            ticks: 0,
            cancel: CancelToken::new(),
            config,
        }
    }

    pub fn with_display(mut self, display: Box<dyn Display>) -> Self {
        self.display = display;
        self
    }

    pub fn chassis(&self) -> &C {
        &self.chassis
    }

    pub fn modes(&self) -> DriveModes {
        self.modes.modes()
    }

    pub fn is_autonomous(&self) -> bool {
        matches!(self.state, RobotState::Autonomous(_))
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Token that stops [`Robot::run`] and interrupts debounce waits.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Hands the chassis to `routine`. Ignored if a routine is already running.
    pub fn start_autonomous(&mut self, routine: Routine) {
        if self.is_autonomous() {
            return;
        }
        let seq = routine.sequencer(&self.implements_config, self.events);
        self.state = RobotState::Autonomous(seq);
    }

    /// One control tick: a single packet exchange, then the teleop or
    /// autonomous path, then telemetry when due.
    pub fn tick(&mut self) {
        // a running motion task steps the brain itself
        let owns_link = !self.chassis.motion_in_flight();
        if owns_link {
            let updated = self.brain.lock().update();
            self.faults.link.observe("link", updated);
        }
        match self.state {
            RobotState::Teleop => self.teleop_tick(owns_link),
            RobotState::Autonomous(_) => self.autonomous_tick(owns_link),
        }
        let period = u64::from(self.config.telemetry_period.max(1));
        if self.ticks % period == 0 {
            self.report_telemetry();
        }
        self.ticks += 1;
    }

    /// Ticks at the configured period until cancelled or `max_ticks` have run,
    /// then stops every motor.
    pub fn run(&mut self, max_ticks: Option<u64>) {
        log::info!(target: "robot", "control loop started tick={:?}", self.config.tick());
        while !self.cancel.is_cancelled() && max_ticks.map_or(true, |n| self.ticks < n) {
            self.tick();
            self.cancel.sleep(self.config.tick());
        }
        self.shutdown();
        log::info!(target: "robot", "control loop stopped after {} ticks", self.ticks);
    }

    fn teleop_tick(&mut self, owns_link: bool) {
        let sample = self.brain.lock().controller();
        let Some(state) = self.faults.controller.observe("controller", sample) else {
            // no operator input: hold everything still rather than keep the
            // last command, but keep tracking the pose
            let stopped = self.chassis.stop();
            self.faults.drive.observe("drive", stopped);
            let stopped = self.implements.stop_all();
            self.faults.implements.observe("implements", stopped);
            let odom = self.chassis.update_odometry();
            self.faults.odometry.observe("odometry", odom);
            return;
        };
        let mut input = TickInput::new(self.brain.clone(), state, owns_link);

        let changes = self.modes.tick(&mut input, &self.cancel);
        for change in self.faults.controller.observe("controller", changes).unwrap_or_default() {
            self.display.mode_changed(change, self.modes.modes());
            self.events.emit(RobotEvent::ModeChanged(change));
        }

        let trigger = self
            .auton_button
            .poll(&mut input, self.config.debounce(), &self.cancel);
        if self.faults.controller.observe("controller", trigger) == Some(true) {
            self.start_autonomous(self.config.routine);
            return;
        }

        let driven = self.input.drive(&self.chassis, &state, self.modes.modes());
        if let Err(e) = &driven {
            if !self.faults.drive.is_failing() {
                self.events.emit(RobotEvent::HardwareFault {
                    context: "drive",
                    error: e.clone(),
                });
            }
        }
        self.faults.drive.observe("drive", driven);

        let implemented = self.drive_implements(&state);
        self.faults.implements.observe("implements", implemented);

        let odom = self.chassis.update_odometry();
        self.faults.odometry.observe("odometry", odom);
    }

    fn drive_implements(&self, state: &ControllerState) -> Result<(), HardwareError> {
        let c = &self.implements_config;
        let pairs = [
            (ImplementId::Intake, Buttons::L1, Buttons::R1, c.intake_rpm),
            (ImplementId::Roller, Buttons::L2, Buttons::R2, c.roller_rpm),
        ];
        let mut first_err = None;
        for (id, forward, reverse, rpm) in pairs {
            let rpm = match (state.held(forward), state.held(reverse)) {
                (true, false) => rpm,
                (false, true) => -rpm,
                _ => 0.0,
            };
            if let Err(e) = self.implements.run(id, rpm) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn autonomous_tick(&mut self, owns_link: bool) {
        let RobotState::Autonomous(seq) = &mut self.state else {
            return;
        };
        let sample = self.brain.lock().controller();
        if let Some(state) = self.faults.controller.observe("controller", sample) {
            let mut input = TickInput::new(self.brain.clone(), state, owns_link);
            let pressed = self
                .auton_button
                .poll(&mut input, self.config.debounce(), &self.cancel);
            if self.faults.controller.observe("controller", pressed) == Some(true) {
                log::info!(target: "auton", "abort requested from the controller routine={}", seq.routine());
                seq.cancel();
            }
        }
        if !seq.tick(&mut self.chassis, &self.implements).is_running() {
            self.state = RobotState::Teleop;
        }
    }

    fn report_telemetry(&mut self) {
        let battery = self.brain.lock().battery();
        let battery = self.faults.battery.observe("battery", battery);
        let status = if self.faults.any() {
            RobotStatus::Degraded
        } else if self.is_autonomous() {
            RobotStatus::Autonomous
        } else {
            RobotStatus::Teleop
        };
        let snapshot = Telemetry {
            battery,
            pose: Some(self.chassis.pose()),
            modes: self.modes.modes(),
            status,
        };
        self.display.telemetry(&snapshot);
    }

    fn shutdown(&mut self) {
        if let RobotState::Autonomous(seq) = &mut self.state {
            seq.cancel();
            seq.tick(&mut self.chassis, &self.implements);
            self.state = RobotState::Teleop;
        }
        if let Err(e) = self.chassis.stop() {
            log::warn!(target: "robot", "could not stop the drive: {e}");
        }
        if let Err(e) = self.implements.stop_all() {
            log::warn!(target: "robot", "could not stop implements: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::MotorConfig;
    use crate::brain::{Brain, Gearset};
    use crate::chassis::{ChassisBuilder, OdomChassis};
    use crate::display::RecordingDisplay;
    use crate::modes::{ModeChange, SpeedMode};
    use crate::motion::MotionSettings;
    use crate::sim::SimBrain;
    use crate::units::Length;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn robot() -> (
        Arc<Mutex<SimBrain>>,
        Arc<Mutex<RecordingDisplay>>,
        Robot<OdomChassis>,
    ) {
        let sim = Arc::new(Mutex::new(SimBrain::default()));
        let chassis = ChassisBuilder::new(sim.clone())
            .with_motors(
                &[MotorConfig::new(12, false), MotorConfig::new(13, false)],
                &[MotorConfig::new(18, true), MotorConfig::new(19, true)],
            )
            .with_dimensions(Gearset::Green, Length::inches(3.5), Length::inches(6.5))
            .with_motion(MotionSettings {
                tick_ms: 1,
                ..MotionSettings::default()
            })
            .build_odometry();
        let display = Arc::new(Mutex::new(RecordingDisplay::default()));
        let config = TeleopConfig {
            tick_ms: 1,
            debounce_ms: 1,
            ..TeleopConfig::default()
        };
        let robot = Robot::new(
            sim.clone(),
            chassis,
            &ImplementsConfig::default(),
            config,
            EventLog::default(),
        )
        .with_display(Box::new(display.clone()));
        (sim, display, robot)
    }

    fn press(buttons: Buttons) -> ControllerState {
        ControllerState::from_normalised([0.0; 4], buttons)
    }

    #[test]
    fn starts_fast_arcade_with_brakes_held() {
        let (sim, _, robot) = robot();
        assert_eq!(robot.modes(), DriveModes::default());
        assert_eq!(sim.lock().brake_mode(12), BrakeMode::Hold);
    }

    #[test]
    fn held_toggle_changes_mode_once() {
        let (sim, display, mut robot) = robot();
        sim.lock().set_controller(press(Buttons::Y));
        robot.tick();
        robot.tick();
        sim.lock().set_controller(ControllerState::default());
        robot.tick();
        assert_eq!(robot.modes().speed, SpeedMode::Slow);
        assert_eq!(
            display.lock().changes,
            vec![ModeChange::Speed(SpeedMode::Slow)]
        );
    }

    #[test]
    fn sticks_drive_and_shoulders_run_implements() {
        let (sim, _, mut robot) = robot();
        sim.lock().set_controller(ControllerState::from_normalised(
            [0.0, 0.5, 0.0, 0.0],
            Buttons::L1 | Buttons::R2,
        ));
        robot.tick();
        let sim = sim.lock();
        assert_eq!(sim.commanded_velocity(12), 100.0);
        assert_eq!(sim.commanded_velocity(18), -100.0);
        assert_eq!(sim.commanded_velocity(5), 200.0);
        assert_eq!(sim.commanded_velocity(6), -200.0);
    }

    #[test]
    fn telemetry_every_period() {
        let (sim, display, mut robot) = robot();
        let low = crate::brain::BatteryInfo {
            voltage: 11.1,
            capacity: 40.0,
            temperature: 35.0,
        };
        sim.lock().set_battery(low);
        for _ in 0..51 {
            robot.tick();
        }
        // ticks 0, 25 and 50
        let display = display.lock();
        assert_eq!(display.snapshots.len(), 3);
        assert_eq!(display.snapshots[0].status, RobotStatus::Teleop);
        assert_eq!(display.snapshots[2].battery, Some(low));
    }

    #[test]
    fn cancelled_run_stops_before_ticking() {
        let (sim, _, mut robot) = robot();
        sim.lock().set_controller(ControllerState::from_normalised(
            [0.0, 1.0, 0.0, 0.0],
            Buttons::L1,
        ));
        robot.tick();
        assert_eq!(sim.lock().commanded_velocity(5), 200.0);
        robot.cancel_token().cancel();
        robot.run(None);
        assert_eq!(robot.ticks(), 1);
        for port in [5, 12, 13, 18, 19] {
            assert_eq!(sim.lock().commanded_velocity(port), 0.0);
        }
    }

    #[test]
    fn lost_controller_stops_the_drive() {
        let (sim, display, mut robot) = robot();
        sim.lock().set_controller(ControllerState::from_normalised(
            [0.0, 1.0, 0.0, 0.0],
            Buttons::empty(),
        ));
        robot.tick();
        assert_eq!(sim.lock().commanded_velocity(13), 200.0);
        sim.lock().set_controller_connected(false);
        for _ in 0..25 {
            robot.tick();
        }
        assert_eq!(sim.lock().commanded_velocity(13), 0.0);
        assert_eq!(
            display.lock().snapshots.last().map(|s| s.status),
            Some(RobotStatus::Degraded)
        );
    }

    #[test]
    fn lost_controller_stops_implements_and_keeps_odometry() {
        let (sim, _, mut robot) = robot();
        sim.lock().set_controller(ControllerState::from_normalised(
            [0.0, 1.0, 0.0, 0.0],
            Buttons::L1 | Buttons::L2,
        ));
        for _ in 0..5 {
            robot.tick();
        }
        assert_eq!(sim.lock().commanded_velocity(5), 200.0);
        assert_eq!(sim.lock().commanded_velocity(6), 200.0);
        let before = robot.chassis().pose().x;
        assert!(before > 0.0);

        sim.lock().set_controller_connected(false);
        // push the wheels by hand while the link to the operator is down
        {
            let mut sim = sim.lock();
            for port in [12, 13, 18, 19] {
                let turned = sim.position(port).unwrap() + if port < 18 { 360.0 } else { -360.0 };
                sim.set_position(port, turned);
            }
        }
        for _ in 0..30 {
            robot.tick();
        }
        let sim = sim.lock();
        for port in [5, 6, 12, 13, 18, 19] {
            assert_eq!(sim.commanded_velocity(port), 0.0);
        }
        assert!(robot.chassis().pose().x > before + 200.0);
    }

    #[test]
    fn one_packet_exchange_per_tick() {
        let (sim, _, mut robot) = robot();
        sim.lock().set_controller(ControllerState::from_normalised(
            [0.3, 0.8, 0.0, 0.0],
            Buttons::R1,
        ));
        for _ in 0..10 {
            robot.tick();
        }
        assert_eq!(sim.lock().update_count(), 10);

        // a confirmed toggle costs one more exchange for the resample
        sim.lock().set_controller(press(Buttons::Y));
        robot.tick();
        assert_eq!(robot.modes().speed, SpeedMode::Slow);
        assert_eq!(sim.lock().update_count(), 12);
    }

    #[test]
    fn a_press_runs_autonomous_and_returns_to_teleop() {
        let (sim, _, mut robot) = robot();
        sim.lock().set_controller(press(Buttons::A));
        robot.tick();
        assert!(robot.is_autonomous());
        sim.lock().set_controller(ControllerState::default());
        for _ in 0..5000 {
            if !robot.is_autonomous() {
                break;
            }
            robot.tick();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!robot.is_autonomous());
        assert!((robot.chassis().pose().x - 100.0).abs() <= 5.0);
    }

    #[test]
    fn second_a_press_aborts_autonomous() {
        let (sim, _, mut robot) = robot();
        robot.start_autonomous(Routine::IntakeSweep);
        robot.tick();
        assert!(robot.is_autonomous());
        sim.lock().set_controller(press(Buttons::A));
        robot.tick();
        assert!(!robot.is_autonomous());
        for port in [5, 12, 13, 18, 19] {
            assert_eq!(sim.lock().commanded_velocity(port), 0.0);
        }
    }
}
