use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::actuator::{Actuator, MotorConfig};
use crate::brain::{BrakeMode, Gearset, SharedBrain};
use crate::cancel::CancelToken;
use crate::drivebase::Drivebase;
use crate::error::{ChassisError, HardwareError};
use crate::logging::{EventLog, RobotEvent};
use crate::motion::{
    ExecMode, MotionGoal, MotionHandle, MotionReport, MotionSettings, MotionShared, MotionStatus,
    MotionTracker, TrackerStep,
};
use crate::odometry::{Odometry, Pose};
use crate::units::Length;

/// Open-loop driving shared by every chassis variant.
pub trait ChassisModel {
    /// Arcade drive; inputs under `deadband` count as zero.
    fn arcade(&self, forward: f64, turn: f64, deadband: f64) -> Result<(), HardwareError>;
    /// Tank drive; inputs under `deadband` count as zero.
    fn tank(&self, left: f64, right: f64, deadband: f64) -> Result<(), HardwareError>;
    fn set_brake_mode(&mut self, mode: BrakeMode) -> Result<(), HardwareError>;
    fn stop(&self) -> Result<(), HardwareError>;
}

/// What a motion request produced.
#[derive(Debug)]
pub enum MotionOutcome {
    Settled(MotionReport),
    InFlight(MotionHandle),
}

impl MotionOutcome {
    /// The handle of an async motion, if this is one.
    pub fn into_handle(self) -> Option<MotionHandle> {
        match self {
            Self::InFlight(handle) => Some(handle),
            Self::Settled(_) => None,
        }
    }
}

/// Closed-loop motions over odometry feedback.
pub trait MotionExecutor: ChassisModel {
    fn execute(&mut self, goal: MotionGoal) -> Result<MotionOutcome, ChassisError>;

    fn move_distance(
        &mut self,
        distance: Length,
        max_velocity: f64,
        mode: ExecMode,
    ) -> Result<MotionOutcome, ChassisError> {
        self.execute(MotionGoal::distance(distance, max_velocity, mode))
    }

    fn turn_angle(
        &mut self,
        degrees: f64,
        max_velocity: f64,
        mode: ExecMode,
    ) -> Result<MotionOutcome, ChassisError> {
        self.execute(MotionGoal::turn(degrees, max_velocity, mode))
    }

    fn wait_until_settled(&mut self, handle: MotionHandle) -> Result<MotionReport, ChassisError>;

    /// Caps the velocity (rpm) of motions issued from now on.
    fn set_max_velocity(&mut self, rpm: f64);
    fn max_velocity(&self) -> f64;

    fn motion_in_flight(&self) -> bool;

    /// Folds the latest encoder readings into the pose estimate.
    fn update_odometry(&self) -> Result<Pose, HardwareError>;
    fn pose(&self) -> Pose;
    fn reset_pose(&mut self, pose: Pose);
}

pub struct ChassisBuilder {
    brain: SharedBrain,
    left: Vec<MotorConfig>,
    right: Vec<MotorConfig>,
    wheel_diameter: Length,
    track_width: Length,
    settings: MotionSettings,
    events: EventLog,
    cancel: CancelToken,
}

impl ChassisBuilder {
    pub fn new(brain: SharedBrain) -> Self {
        Self {
            brain,
            left: Vec::new(),
            right: Vec::new(),
            wheel_diameter: Length::inches(4.0),
            track_width: Length::inches(11.5),
            settings: MotionSettings::default(),
            events: EventLog::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_motors(mut self, left: &[MotorConfig], right: &[MotorConfig]) -> Self {
        self.left = left.to_vec();
        self.right = right.to_vec();
        self
    }

    /// Sets the gearset of every drive motor plus the wheel geometry.
    pub fn with_dimensions(
        mut self,
        gearset: Gearset,
        wheel_diameter: Length,
        track_width: Length,
    ) -> Self {
        for m in self.left.iter_mut().chain(self.right.iter_mut()) {
            m.gearset = gearset;
        }
        self.wheel_diameter = wheel_diameter;
        self.track_width = track_width;
        self
    }

    pub fn with_motion(mut self, settings: MotionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Every motion, sync or async, fails with `Cancelled` once `cancel` is
    /// set. The token is sticky: later motions fail on their first tick.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn drivebase(&self) -> Drivebase {
        let group = |configs: &[MotorConfig]| -> Vec<Actuator> {
            configs
                .iter()
                .map(|c| Actuator::new(*c, self.brain.clone()))
                .collect()
        };
        Drivebase::new(group(&self.left), group(&self.right), self.wheel_diameter)
    }

    /// Open-loop chassis without odometry.
    pub fn build(self) -> TeleopChassis {
        TeleopChassis {
            drivebase: self.drivebase(),
        }
    }

    /// Closed-loop chassis with odometry.
    pub fn build_odometry(self) -> OdomChassis {
        let drivebase = self.drivebase();
        let max_velocity = drivebase.max_rpm();
        OdomChassis {
            state: Arc::new(Mutex::new(DriveState {
                drivebase,
                odometry: Odometry::new(self.track_width),
            })),
            brain: self.brain,
            settings: self.settings,
            max_velocity,
            active: None,
            events: self.events,
            cancel: self.cancel,
        }
    }
}

#[derive(Debug)]
pub struct TeleopChassis {
    drivebase: Drivebase,
}

impl ChassisModel for TeleopChassis {
    fn arcade(&self, forward: f64, turn: f64, deadband: f64) -> Result<(), HardwareError> {
        self.drivebase.arcade(forward, turn, deadband)
    }
    fn tank(&self, left: f64, right: f64, deadband: f64) -> Result<(), HardwareError> {
        self.drivebase.tank(left, right, deadband)
    }
    fn set_brake_mode(&mut self, mode: BrakeMode) -> Result<(), HardwareError> {
        self.drivebase.set_brake_mode(mode)
    }
    fn stop(&self) -> Result<(), HardwareError> {
        self.drivebase.stop()
    }
}

/// Everything the motion loop touches on each tick.
#[derive(Debug)]
struct DriveState {
    drivebase: Drivebase,
    odometry: Odometry,
}

impl DriveState {
    fn refresh(&mut self) -> Result<Pose, HardwareError> {
        let (left, right) = self.drivebase.side_distances()?;
        self.odometry.update(left, right);
        Ok(self.odometry.pose())
    }

    /// Zero velocity with the brake engaged. Best effort: errors are logged.
    fn force_stop(&mut self) {
        if let Err(e) = self.drivebase.stop() {
            log::warn!(target: "motion", "force stop could not zero the drive: {e}");
        }
        if let Err(e) = self.drivebase.set_brake_mode(BrakeMode::Hold) {
            log::warn!(target: "motion", "force stop could not engage the brake: {e}");
        }
    }
}

/// Inputs of one motion loop.
struct MotionRun {
    state: Arc<Mutex<DriveState>>,
    brain: SharedBrain,
    tracker: MotionTracker,
    shared: Arc<MotionShared>,
    tick: Duration,
    events: EventLog,
    // owner-wide token, on top of the per-motion one in `shared`
    cancel: CancelToken,
}

impl MotionRun {
    fn fail(&self, state: &mut DriveState, error: ChassisError) -> MotionStatus {
        state.force_stop();
        self.events.emit(RobotEvent::MotionFailed {
            kind: self.tracker.kind(),
            error: error.clone(),
        });
        MotionStatus::Failed(error)
    }

    fn step(&mut self) -> MotionStatus {
        let state = self.state.clone();
        let mut state = state.lock();
        if self.shared.cancel.is_cancelled() || self.cancel.is_cancelled() {
            return self.fail(&mut state, ChassisError::Cancelled);
        }
        // the brain guard must drop before refresh() reads the encoders
        let updated = self.brain.lock().update();
        let pose = match updated.and_then(|()| state.refresh()) {
            Ok(pose) => pose,
            Err(e) => return self.fail(&mut state, e.into()),
        };
        let error = self.tracker.error(&pose);
        match self.tracker.tick(&pose) {
            TrackerStep::Drive { left, right } => {
                if let Err(e) = state.drivebase.write_powers(left, right) {
                    return self.fail(&mut state, e.into());
                }
                MotionStatus::Running {
                    ticks: self.tracker.ticks(),
                    error,
                }
            }
            TrackerStep::Settled(report) => {
                if let Err(e) = state.drivebase.stop() {
                    return self.fail(&mut state, e.into());
                }
                self.events.emit(RobotEvent::MotionSettled(report));
                MotionStatus::Settled(report)
            }
            TrackerStep::TimedOut { ticks, remaining } => {
                self.fail(&mut state, ChassisError::MotionTimeout { ticks, remaining })
            }
        }
    }

    /// Ticks the motion until it finishes, publishing status after each tick.
    fn run(mut self) {
        loop {
            let status = self.step();
            let finished = status.is_finished();
            self.shared.set_status(status);
            if finished {
                return;
            }
            // a cancelled sleep is picked up at the top of the next step
            self.shared.cancel.sleep(self.tick);
        }
    }
}

/// Closed-loop chassis. At most one motion may be in flight at a time.
pub struct OdomChassis {
    state: Arc<Mutex<DriveState>>,
    brain: SharedBrain,
    settings: MotionSettings,
    max_velocity: f64,
    active: Option<Arc<MotionShared>>,
    events: EventLog,
    cancel: CancelToken,
}

impl ChassisModel for OdomChassis {
    fn arcade(&self, forward: f64, turn: f64, deadband: f64) -> Result<(), HardwareError> {
        self.state.lock().drivebase.arcade(forward, turn, deadband)
    }
    fn tank(&self, left: f64, right: f64, deadband: f64) -> Result<(), HardwareError> {
        self.state.lock().drivebase.tank(left, right, deadband)
    }
    fn set_brake_mode(&mut self, mode: BrakeMode) -> Result<(), HardwareError> {
        self.state.lock().drivebase.set_brake_mode(mode)
    }
    fn stop(&self) -> Result<(), HardwareError> {
        self.state.lock().drivebase.stop()
    }
}

impl MotionExecutor for OdomChassis {
    fn execute(&mut self, goal: MotionGoal) -> Result<MotionOutcome, ChassisError> {
        if self.motion_in_flight() {
            return Err(ChassisError::ConcurrentMotion);
        }
        let (start, max_rpm) = {
            let mut state = self.state.lock();
            (state.refresh()?, state.drivebase.max_rpm())
        };
        let rpm = goal.max_velocity.min(self.max_velocity);
        let tracker = MotionTracker::new(goal.kind, start, rpm / max_rpm, self.settings);
        self.events.emit(RobotEvent::MotionStarted {
            kind: goal.kind,
            max_velocity: rpm,
        });

        let shared = MotionShared::new();
        let run = MotionRun {
            state: self.state.clone(),
            brain: self.brain.clone(),
            tracker,
            shared: shared.clone(),
            tick: self.settings.tick(),
            events: self.events,
            cancel: self.cancel.clone(),
        };
        match goal.mode {
            ExecMode::Sync => {
                run.run();
                match shared.outcome() {
                    Some(Ok(report)) => Ok(MotionOutcome::Settled(report)),
                    Some(Err(e)) => Err(e),
                    // run() only returns once the status is final
                    None => Err(ChassisError::Cancelled),
                }
            }
            ExecMode::Async => {
                let worker = std::thread::Builder::new()
                    .name("motion".into())
                    .spawn(move || run.run())
                    .map_err(|e| HardwareError::Link(format!("could not spawn motion task: {e}")))?;
                self.active = Some(shared.clone());
                Ok(MotionOutcome::InFlight(MotionHandle::new(
                    shared,
                    worker,
                    self.settings.tick(),
                )))
            }
        }
    }

    fn wait_until_settled(&mut self, handle: MotionHandle) -> Result<MotionReport, ChassisError> {
        let outcome = handle.wait_until_settled();
        if self.active.as_ref().is_some_and(|a| a.is_finished()) {
            self.active = None;
        }
        outcome
    }

    fn set_max_velocity(&mut self, rpm: f64) {
        self.max_velocity = rpm.max(0.0);
    }

    fn max_velocity(&self) -> f64 {
        self.max_velocity
    }

    fn motion_in_flight(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.is_finished())
    }

    fn update_odometry(&self) -> Result<Pose, HardwareError> {
        self.state.lock().refresh()
    }

    fn pose(&self) -> Pose {
        self.state.lock().odometry.pose()
    }

    fn reset_pose(&mut self, pose: Pose) {
        self.state.lock().odometry.reset(pose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBrain;
    use approx::assert_abs_diff_eq;

    fn settings() -> MotionSettings {
        MotionSettings {
            tick_ms: 1,
            ..MotionSettings::default()
        }
    }

    fn chassis(settings: MotionSettings) -> (Arc<Mutex<SimBrain>>, OdomChassis) {
        let sim = Arc::new(Mutex::new(SimBrain::default()));
        let chassis = ChassisBuilder::new(sim.clone())
            .with_motors(
                &[MotorConfig::new(12, false), MotorConfig::new(13, false)],
                &[MotorConfig::new(18, true), MotorConfig::new(19, true)],
            )
            .with_dimensions(Gearset::Green, Length::inches(3.5), Length::inches(6.5))
            .with_motion(settings)
            .build_odometry();
        (sim, chassis)
    }

    #[test]
    fn sync_move_settles_at_target() {
        let (_sim, mut chassis) = chassis(settings());
        let outcome = chassis
            .move_distance(Length::cm(30.0), 200.0, ExecMode::Sync)
            .unwrap();
        let MotionOutcome::Settled(report) = outcome else {
            panic!("sync move returned a handle");
        };
        assert!(report.error.abs() <= 5.0);
        assert_abs_diff_eq!(chassis.pose().x, 300.0, epsilon = 5.0);
        assert!(!chassis.motion_in_flight());
    }

    #[test]
    fn sync_turn_rotates_clockwise() {
        let (_sim, mut chassis) = chassis(settings());
        chassis.turn_angle(90.0, 100.0, ExecMode::Sync).unwrap();
        let pose = chassis.pose();
        assert_abs_diff_eq!(pose.heading, 90.0, epsilon = 1.0);
        assert_abs_diff_eq!(pose.x, 0.0, epsilon = 1.0);
    }

    #[test]
    fn max_velocity_caps_commands() {
        let (sim, mut chassis) = chassis(settings());
        chassis.set_max_velocity(50.0);
        let handle = chassis
            .move_distance(Length::m(1.0), 200.0, ExecMode::Async)
            .unwrap()
            .into_handle()
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(sim.lock().commanded_velocity(12).abs() <= 50.0 + 1e-9);
        assert!(matches!(handle.status(), MotionStatus::Running { .. }));
        handle.cancel();
        assert_eq!(
            chassis.wait_until_settled(handle),
            Err(ChassisError::Cancelled)
        );
    }

    #[test]
    fn sync_move_stops_when_chassis_token_is_cancelled() {
        let sim = Arc::new(Mutex::new(SimBrain::default()));
        let cancel = CancelToken::new();
        let mut chassis = ChassisBuilder::new(sim.clone())
            .with_motors(&[MotorConfig::new(12, false)], &[MotorConfig::new(18, true)])
            .with_dimensions(Gearset::Green, Length::inches(3.5), Length::inches(6.5))
            .with_motion(settings())
            .with_cancel(cancel.clone())
            .build_odometry();
        let canceller = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                cancel.cancel();
            })
        };
        let err = chassis
            .move_distance(Length::m(2.0), 50.0, ExecMode::Sync)
            .unwrap_err();
        canceller.join().unwrap();
        assert_eq!(err, ChassisError::Cancelled);
        assert!(chassis.pose().x < 2000.0);
        let sim = sim.lock();
        assert_eq!(sim.commanded_velocity(12), 0.0);
        assert_eq!(sim.brake_mode(12), BrakeMode::Hold);
    }

    #[test]
    fn jammed_drive_times_out_and_holds() {
        let (sim, mut chassis) = chassis(MotionSettings {
            max_ticks: 40,
            stall_ticks: None,
            ..settings()
        });
        {
            let mut sim = sim.lock();
            for port in [12, 13, 18, 19] {
                sim.jam(port);
            }
        }
        let err = chassis
            .move_distance(Length::cm(30.0), 200.0, ExecMode::Sync)
            .unwrap_err();
        assert_eq!(
            err,
            ChassisError::MotionTimeout {
                ticks: 40,
                remaining: 300.0
            }
        );
        let sim = sim.lock();
        for port in [12, 13, 18, 19] {
            assert_eq!(sim.commanded_velocity(port), 0.0);
            assert_eq!(sim.brake_mode(port), BrakeMode::Hold);
        }
    }

    #[test]
    fn disconnected_encoder_fails_the_motion() {
        let (sim, mut chassis) = chassis(settings());
        let handle = chassis
            .move_distance(Length::m(1.0), 200.0, ExecMode::Async)
            .unwrap()
            .into_handle()
            .unwrap();
        sim.lock().disconnect(13);
        let err = chassis.wait_until_settled(handle).unwrap_err();
        assert_eq!(
            err,
            ChassisError::HardwareUnavailable(HardwareError::Disconnected { port: 13 })
        );
        assert!(!chassis.motion_in_flight());
    }

    #[test]
    fn second_async_goal_is_rejected() {
        let (_sim, mut chassis) = chassis(settings());
        let first = chassis
            .move_distance(Length::cm(30.0), 200.0, ExecMode::Async)
            .unwrap()
            .into_handle()
            .unwrap();
        let second = chassis.turn_angle(90.0, 200.0, ExecMode::Async);
        assert!(matches!(second, Err(ChassisError::ConcurrentMotion)));
        let sync = chassis.move_distance(Length::cm(5.0), 200.0, ExecMode::Sync);
        assert!(matches!(sync, Err(ChassisError::ConcurrentMotion)));

        let report = chassis.wait_until_settled(first).unwrap();
        assert!(report.error.abs() <= 5.0);
        assert_abs_diff_eq!(chassis.pose().x, 300.0, epsilon = 5.0);
        // the slot frees up once the first motion has been joined
        assert!(chassis.turn_angle(10.0, 100.0, ExecMode::Sync).is_ok());
    }

    #[test]
    fn teleop_chassis_drives_open_loop() {
        let sim = Arc::new(Mutex::new(SimBrain::default()));
        let mut chassis = ChassisBuilder::new(sim.clone())
            .with_motors(&[MotorConfig::new(1, false)], &[MotorConfig::new(2, true)])
            .build();
        chassis.set_brake_mode(BrakeMode::Coast).unwrap();
        chassis.arcade(0.1, 0.5, 0.15).unwrap();
        assert_abs_diff_eq!(sim.lock().commanded_velocity(1), 100.0);
        assert_abs_diff_eq!(sim.lock().commanded_velocity(2), 100.0);
        chassis.stop().unwrap();
        assert_eq!(sim.lock().commanded_velocity(1), 0.0);
    }
}
