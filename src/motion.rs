use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::ChassisError;
use crate::odometry::Pose;
use crate::units::Length;
use crate::vec::Vec2;

/// Minimum error reduction per tick that counts as progress for stall
/// detection, in mm or degrees.
const PROGRESS_EPSILON: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionKind {
    /// Straight line along the heading held when the motion started.
    /// Negative drives backwards.
    Distance(Length),
    /// Rotation in place, degrees, positive is clockwise.
    Turn(f64),
}

impl fmt::Display for MotionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distance(d) => write!(f, "distance({d})"),
            Self::Turn(a) => write!(f, "turn({a}deg)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Block the caller until the motion settles or fails.
    Sync,
    /// Return a [`MotionHandle`] and run the motion on its own thread.
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionGoal {
    pub kind: MotionKind,
    /// Velocity cap in rpm.
    pub max_velocity: f64,
    pub mode: ExecMode,
}

impl MotionGoal {
    pub fn distance(distance: Length, max_velocity: f64, mode: ExecMode) -> Self {
        Self {
            kind: MotionKind::Distance(distance),
            max_velocity,
            mode,
        }
    }
    pub fn turn(degrees: f64, max_velocity: f64, mode: ExecMode) -> Self {
        Self {
            kind: MotionKind::Turn(degrees),
            max_velocity,
            mode,
        }
    }
}

/// Tuning for closed-loop motions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    pub distance_tolerance: Length,
    // degrees
    pub angle_tolerance: f64,
    /// Consecutive ticks inside the tolerance band before a motion settles.
    pub settle_ticks: u32,
    pub max_ticks: u32,
    /// Ticks without progress before a motion counts as stalled. `None` or
    /// `0` disables stall detection.
    pub stall_ticks: Option<u32>,
    // power per mm / per degree of error
    pub distance_kp: f64,
    pub turn_kp: f64,
    // turn power per degree of heading drift on straight moves
    pub heading_kp: f64,
    pub tick_ms: u64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            distance_tolerance: Length::mm(5.0),
            angle_tolerance: 1.0,
            settle_ticks: 5,
            max_ticks: 500,
            stall_ticks: Some(50),
            distance_kp: 0.01,
            turn_kp: 0.02,
            heading_kp: 0.02,
            tick_ms: 10,
        }
    }
}

impl MotionSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionReport {
    pub kind: MotionKind,
    pub ticks: u32,
    /// Signed error left when the motion ended (mm or degrees).
    pub error: f64,
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerStep {
    /// Keep going with these normalised (left, right) powers.
    Drive { left: f64, right: f64 },
    Settled(MotionReport),
    TimedOut { ticks: u32, remaining: f64 },
}

#[derive(Debug, Clone)]
pub struct MotionTracker {
    kind: MotionKind,
    start: Pose,
    target: f64,
    tolerance: f64,
    /// Normalised power cap.
    limit: f64,
    settings: MotionSettings,
    ticks: u32,
    settled_for: u32,
    best: f64,
    stalled_for: u32,
}

impl MotionTracker {
    /// `limit` is the power cap as a fraction of the drive's top speed.
    pub fn new(kind: MotionKind, start: Pose, limit: f64, settings: MotionSettings) -> Self {
        let (target, tolerance) = match kind {
            MotionKind::Distance(d) => (d.as_mm(), settings.distance_tolerance.as_mm()),
            MotionKind::Turn(a) => (start.heading + a, settings.angle_tolerance),
        };
        Self {
            kind,
            start,
            target,
            tolerance,
            limit: limit.clamp(0.0, 1.0),
            settings,
            ticks: 0,
            settled_for: 0,
            best: f64::INFINITY,
            stalled_for: 0,
        }
    }

    pub fn kind(&self) -> MotionKind {
        self.kind
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Signed remaining error for `pose`.
    pub fn error(&self, pose: &Pose) -> f64 {
        match self.kind {
            MotionKind::Distance(_) => {
                let along = Vec2::from_heading(self.start.heading);
                let progress = (pose.position() - self.start.position()).dot(along);
                self.target - progress
            }
            MotionKind::Turn(_) => self.target - pose.heading,
        }
    }

    pub fn tick(&mut self, pose: &Pose) -> TrackerStep {
        self.ticks += 1;
        let error = self.error(pose);
        let inside = error.abs() <= self.tolerance;

        if inside {
            self.settled_for += 1;
            if self.settled_for >= self.settings.settle_ticks.max(1) {
                return TrackerStep::Settled(MotionReport {
                    kind: self.kind,
                    ticks: self.ticks,
                    error,
                    pose: *pose,
                });
            }
        } else {
            self.settled_for = 0;
            if error.abs() < self.best - PROGRESS_EPSILON {
                self.best = error.abs();
                self.stalled_for = 0;
            } else {
                self.stalled_for += 1;
            }
            if self
                .settings
                .stall_ticks
                .is_some_and(|n| n > 0 && self.stalled_for >= n)
            {
                return TrackerStep::TimedOut {
                    ticks: self.ticks,
                    remaining: error,
                };
            }
        }

        if self.ticks >= self.settings.max_ticks {
            return TrackerStep::TimedOut {
                ticks: self.ticks,
                remaining: error,
            };
        }

        match self.kind {
            MotionKind::Distance(_) => {
                let forward = (self.settings.distance_kp * error).clamp(-self.limit, self.limit);
                let correction = self.settings.heading_kp * (self.start.heading - pose.heading);
                TrackerStep::Drive {
                    left: (forward + correction).clamp(-1.0, 1.0),
                    right: (forward - correction).clamp(-1.0, 1.0),
                }
            }
            MotionKind::Turn(_) => {
                let turn = (self.settings.turn_kp * error).clamp(-self.limit, self.limit);
                TrackerStep::Drive {
                    left: turn,
                    right: -turn,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MotionStatus {
    Running { ticks: u32, error: f64 },
    Settled(MotionReport),
    Failed(ChassisError),
}

impl MotionStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running { .. })
    }
}

/// State shared between a running motion and whoever observes it.
#[derive(Debug)]
pub(crate) struct MotionShared {
    status: Mutex<MotionStatus>,
    pub(crate) cancel: CancelToken,
}

impl MotionShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(MotionStatus::Running {
                ticks: 0,
                error: f64::NAN,
            }),
            cancel: CancelToken::new(),
        })
    }
    pub(crate) fn status(&self) -> MotionStatus {
        self.status.lock().clone()
    }
    pub(crate) fn set_status(&self, status: MotionStatus) {
        *self.status.lock() = status;
    }
    pub(crate) fn is_finished(&self) -> bool {
        self.status.lock().is_finished()
    }
    pub(crate) fn outcome(&self) -> Option<Result<MotionReport, ChassisError>> {
        match self.status() {
            MotionStatus::Running { .. } => None,
            MotionStatus::Settled(report) => Some(Ok(report)),
            MotionStatus::Failed(e) => Some(Err(e)),
        }
    }
}

/// Token for a motion running on its own thread. Consumed by
/// [`MotionHandle::wait_until_settled`].
#[derive(Debug)]
pub struct MotionHandle {
    shared: Arc<MotionShared>,
    worker: Option<JoinHandle<()>>,
    poll: Duration,
}

impl MotionHandle {
    pub(crate) fn new(shared: Arc<MotionShared>, worker: JoinHandle<()>, poll: Duration) -> Self {
        Self {
            shared,
            worker: Some(worker),
            poll,
        }
    }

    pub fn status(&self) -> MotionStatus {
        self.shared.status()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Asks the motion to stop at its next tick. The drive is force-stopped
    /// and waiting on the handle yields [`ChassisError::Cancelled`].
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Polls the motion's status once per control tick until it finishes.
    pub fn wait_until_settled(mut self) -> Result<MotionReport, ChassisError> {
        let outcome = loop {
            if let Some(outcome) = self.shared.outcome() {
                break outcome;
            }
            std::thread::sleep(self.poll);
        };
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!(target: "motion", "motion worker panicked");
            }
        }
        outcome
    }
}
