use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::actuator::{Actuator, MotorConfig};
use crate::brain::{BrakeMode, SharedBrain};
use crate::cancel::CancelToken;
use crate::chassis::{MotionExecutor, MotionOutcome};
use crate::error::{ChassisError, HardwareError};
use crate::logging::{EventLog, RobotEvent};
use crate::motion::{ExecMode, MotionHandle, MotionKind};
use crate::units::Length;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImplementId {
    Intake,
    Roller,
}

impl fmt::Display for ImplementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intake => f.write_str("intake"),
            Self::Roller => f.write_str("roller"),
        }
    }
}

/// Wiring and working speeds of the non-drive motors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplementsConfig {
    pub intake: MotorConfig,
    pub roller: MotorConfig,
    pub intake_rpm: f64,
    pub roller_rpm: f64,
}

impl Default for ImplementsConfig {
    fn default() -> Self {
        Self {
            intake: MotorConfig::new(5, false),
            roller: MotorConfig::new(6, false),
            intake_rpm: 200.0,
            roller_rpm: 200.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Implements {
    intake: Actuator,
    roller: Actuator,
}

impl Implements {
    pub fn new(config: &ImplementsConfig, brain: SharedBrain) -> Self {
        Self {
            intake: Actuator::new(config.intake, brain.clone()),
            roller: Actuator::new(config.roller, brain),
        }
    }

    pub fn get(&self, id: ImplementId) -> &Actuator {
        match id {
            ImplementId::Intake => &self.intake,
            ImplementId::Roller => &self.roller,
        }
    }

    pub fn run(&self, id: ImplementId, rpm: f64) -> Result<(), HardwareError> {
        self.get(id).move_velocity(rpm)
    }

    /// Zeroes both implements, returning the first failure.
    pub fn stop_all(&self) -> Result<(), HardwareError> {
        let intake = self.intake.stop();
        let roller = self.roller.stop();
        intake.and(roller)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutonStep {
    /// Runs one implement for a fixed time, then zeroes it.
    Pulse {
        implement: ImplementId,
        rpm: f64,
        duration: Duration,
    },
    /// A closed-loop motion. `None` uses the chassis' velocity cap.
    Move {
        kind: MotionKind,
        max_velocity: Option<f64>,
    },
    /// A motion with implements running until it is joined.
    MoveWhile {
        kind: MotionKind,
        max_velocity: Option<f64>,
        implements: Vec<(ImplementId, f64)>,
    },
    SetBrakeMode(BrakeMode),
    SetMaxVelocity(f64),
}

impl fmt::Display for AutonStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pulse {
                implement,
                rpm,
                duration,
            } => write!(f, "pulse {implement} at {rpm}rpm for {duration:?}"),
            Self::Move { kind, .. } => write!(f, "move {kind}"),
            Self::MoveWhile {
                kind, implements, ..
            } => {
                write!(f, "move {kind} while running")?;
                for (id, rpm) in implements {
                    write!(f, " {id}@{rpm}rpm")?;
                }
                Ok(())
            }
            Self::SetBrakeMode(mode) => write!(f, "brake mode {mode:?}"),
            Self::SetMaxVelocity(rpm) => write!(f, "max velocity {rpm}rpm"),
        }
    }
}

/// Step currently being advanced.
#[derive(Debug)]
enum Active {
    Pulse {
        implement: ImplementId,
        until: Instant,
    },
    Motion {
        handle: MotionHandle,
        implements: Vec<ImplementId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerStatus {
    Running,
    Finished { failed_steps: usize },
    Aborted,
}

impl SequencerStatus {
    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

#[derive(Debug)]
pub struct Sequencer {
    routine: String,
    steps: VecDeque<AutonStep>,
    active: Option<Active>,
    failed_steps: usize,
    started: bool,
    // chassis velocity cap seen on the first tick, put back when the run ends
    saved_velocity: Option<f64>,
    done: Option<SequencerStatus>,
    cancel: CancelToken,
    events: EventLog,
}

impl Sequencer {
    pub fn new(routine: impl Into<String>, steps: Vec<AutonStep>, events: EventLog) -> Self {
        Self {
            routine: routine.into(),
            steps: steps.into(),
            active: None,
            failed_steps: 0,
            started: false,
            saved_velocity: None,
            done: None,
            cancel: CancelToken::new(),
            events,
        }
    }

    pub fn routine(&self) -> &str {
        &self.routine
    }

    /// Steps not yet started, including none of the active one.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }

    /// Requests an abort, honoured on the next tick.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Advances the routine by one control tick. Instant steps run back to
    /// back; a pulse or motion holds the queue until it completes.
    pub fn tick(
        &mut self,
        chassis: &mut dyn MotionExecutor,
        implements: &Implements,
    ) -> SequencerStatus {
        if let Some(done) = self.done {
            return done;
        }
        if !self.started {
            self.started = true;
            self.saved_velocity = Some(chassis.max_velocity());
            self.events.emit(RobotEvent::AutonStarted {
                routine: self.routine.clone(),
            });
        }
        if self.cancel.is_cancelled() {
            return self.abort(chassis, implements);
        }

        loop {
            if let Some(active) = self.active.take() {
                self.active = self.advance(active, chassis, implements);
                if self.active.is_some() {
                    return SequencerStatus::Running;
                }
            }
            let Some(step) = self.steps.pop_front() else {
                let status = SequencerStatus::Finished {
                    failed_steps: self.failed_steps,
                };
                return self.finish(chassis, status);
            };
            log::debug!(target: "auton", "step started routine={} step=\"{step}\"", self.routine);
            match self.start(step, chassis, implements) {
                Ok(Some(active)) => {
                    self.active = Some(active);
                    return SequencerStatus::Running;
                }
                Ok(None) => {}
                Err(e) if e.is_recoverable() => self.step_failed(&e),
                Err(e) => {
                    log::error!(target: "auton", "routine={} cannot continue: {e}", self.routine);
                    return self.abort(chassis, implements);
                }
            }
        }
    }

    /// Ticks until the routine ends, sleeping `period` between ticks.
    pub fn run_to_completion(
        &mut self,
        chassis: &mut dyn MotionExecutor,
        implements: &Implements,
        period: Duration,
    ) -> SequencerStatus {
        loop {
            let status = self.tick(chassis, implements);
            if !status.is_running() {
                return status;
            }
            // a cancelled sleep is turned into an abort by the next tick
            self.cancel.sleep(period);
        }
    }

    fn start(
        &mut self,
        step: AutonStep,
        chassis: &mut dyn MotionExecutor,
        implements: &Implements,
    ) -> Result<Option<Active>, ChassisError> {
        match step {
            AutonStep::Pulse {
                implement,
                rpm,
                duration,
            } => {
                implements.run(implement, rpm)?;
                Ok(Some(Active::Pulse {
                    implement,
                    until: Instant::now() + duration,
                }))
            }
            AutonStep::Move { kind, max_velocity } => {
                self.start_motion(chassis, kind, max_velocity, Vec::new(), implements)
            }
            AutonStep::MoveWhile {
                kind,
                max_velocity,
                implements: running,
            } => self.start_motion(chassis, kind, max_velocity, running, implements),
            AutonStep::SetBrakeMode(mode) => {
                chassis.set_brake_mode(mode)?;
                Ok(None)
            }
            AutonStep::SetMaxVelocity(rpm) => {
                chassis.set_max_velocity(rpm);
                Ok(None)
            }
        }
    }

    fn start_motion(
        &mut self,
        chassis: &mut dyn MotionExecutor,
        kind: MotionKind,
        max_velocity: Option<f64>,
        running: Vec<(ImplementId, f64)>,
        implements: &Implements,
    ) -> Result<Option<Active>, ChassisError> {
        let rpm = max_velocity.unwrap_or(f64::INFINITY);
        let outcome = match kind {
            MotionKind::Distance(d) => chassis.move_distance(d, rpm, ExecMode::Async)?,
            MotionKind::Turn(a) => chassis.turn_angle(a, rpm, ExecMode::Async)?,
        };
        let MotionOutcome::InFlight(handle) = outcome else {
            return Ok(None);
        };
        // implements start only once the motion is underway
        let mut ids = Vec::with_capacity(running.len());
        for (id, rpm) in running {
            if let Err(e) = implements.run(id, rpm) {
                self.step_failed(&e.into());
            }
            ids.push(id);
        }
        Ok(Some(Active::Motion {
            handle,
            implements: ids,
        }))
    }

    /// Returns the step back if it is still in progress.
    fn advance(
        &mut self,
        active: Active,
        chassis: &mut dyn MotionExecutor,
        implements: &Implements,
    ) -> Option<Active> {
        match active {
            Active::Pulse { implement, until } => {
                if Instant::now() < until {
                    return Some(Active::Pulse { implement, until });
                }
                if let Err(e) = implements.get(implement).stop() {
                    self.step_failed(&e.into());
                }
                None
            }
            Active::Motion {
                handle,
                implements: ids,
            } => {
                if !handle.is_finished() {
                    return Some(Active::Motion {
                        handle,
                        implements: ids,
                    });
                }
                if let Err(e) = chassis.wait_until_settled(handle) {
                    self.step_failed(&e);
                }
                for id in ids {
                    if let Err(e) = implements.get(id).stop() {
                        self.step_failed(&e.into());
                    }
                }
                None
            }
        }
    }

    fn step_failed(&mut self, error: &ChassisError) {
        self.failed_steps += 1;
        log::warn!(target: "auton", "step failed routine={} error=\"{error}\"", self.routine);
    }

    /// Stops whatever the routine was driving. Best effort.
    fn abort(
        &mut self,
        chassis: &mut dyn MotionExecutor,
        implements: &Implements,
    ) -> SequencerStatus {
        if let Some(Active::Motion { handle, .. }) = self.active.take() {
            handle.cancel();
            // the motion reports Cancelled; nothing else to learn from it
            let _ = chassis.wait_until_settled(handle);
        }
        self.steps.clear();
        if let Err(e) = chassis.stop() {
            log::warn!(target: "auton", "abort could not stop the drive: {e}");
        }
        if let Err(e) = implements.stop_all() {
            log::warn!(target: "auton", "abort could not stop implements: {e}");
        }
        self.restore_velocity(chassis);
        self.events.emit(RobotEvent::AutonAborted {
            routine: self.routine.clone(),
        });
        self.done = Some(SequencerStatus::Aborted);
        SequencerStatus::Aborted
    }

    fn restore_velocity(&mut self, chassis: &mut dyn MotionExecutor) {
        if let Some(rpm) = self.saved_velocity.take() {
            chassis.set_max_velocity(rpm);
        }
    }

    fn finish(
        &mut self,
        chassis: &mut dyn MotionExecutor,
        status: SequencerStatus,
    ) -> SequencerStatus {
        self.restore_velocity(chassis);
        self.events.emit(RobotEvent::AutonFinished {
            routine: self.routine.clone(),
            failed_steps: self.failed_steps,
        });
        self.done = Some(status);
        status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Routine {
    /// Hold the brakes and creep 0.1 m forward at 50 rpm.
    #[default]
    Simple,
    /// Drive 30 cm with the intake running, pulse the roller, turn a quarter
    /// clockwise and back off.
    IntakeSweep,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown autonomous routine `{0}` (expected `simple` or `intake-sweep`)")]
pub struct UnknownRoutine(pub String);

impl FromStr for Routine {
    type Err = UnknownRoutine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "intake-sweep" | "intake_sweep" => Ok(Self::IntakeSweep),
            other => Err(UnknownRoutine(other.to_string())),
        }
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => f.write_str("simple"),
            Self::IntakeSweep => f.write_str("intake-sweep"),
        }
    }
}

impl Routine {
    pub fn steps(self, implements: &ImplementsConfig) -> Vec<AutonStep> {
        match self {
            Self::Simple => vec![
                AutonStep::SetBrakeMode(BrakeMode::Hold),
                AutonStep::SetMaxVelocity(50.0),
                AutonStep::Move {
                    kind: MotionKind::Distance(Length::m(0.1)),
                    max_velocity: None,
                },
            ],
            Self::IntakeSweep => vec![
                AutonStep::SetBrakeMode(BrakeMode::Hold),
                AutonStep::MoveWhile {
                    kind: MotionKind::Distance(Length::cm(30.0)),
                    max_velocity: None,
                    implements: vec![(ImplementId::Intake, implements.intake_rpm)],
                },
                AutonStep::Pulse {
                    implement: ImplementId::Roller,
                    rpm: implements.roller_rpm,
                    duration: Duration::from_millis(500),
                },
                AutonStep::Move {
                    kind: MotionKind::Turn(90.0),
                    max_velocity: Some(100.0),
                },
                AutonStep::Move {
                    kind: MotionKind::Distance(Length::cm(-30.0)),
                    max_velocity: None,
                },
            ],
        }
    }

    pub fn sequencer(self, implements: &ImplementsConfig, events: EventLog) -> Sequencer {
        Sequencer::new(self.to_string(), self.steps(implements), events)
    }
}
