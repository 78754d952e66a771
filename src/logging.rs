use std::fmt;

use log::{Level, LevelFilter};
use serde::{Deserialize, Serialize};

use crate::error::{ChassisError, HardwareError};
use crate::modes::ModeChange;
use crate::motion::{MotionKind, MotionReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub competition: bool,
    pub verbose: bool,
}

impl LogConfig {
    pub fn level(&self) -> LevelFilter {
        match (self.competition, self.verbose) {
            (true, _) => LevelFilter::Warn,
            (false, true) => LevelFilter::Debug,
            (false, false) => LevelFilter::Info,
        }
    }
}

/// Installs `env_logger` at the level implied by `config`. `RUST_LOG` still
/// overrides it.
pub fn init(config: &LogConfig) -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(config.level())
        .parse_default_env()
        .format_timestamp_millis()
        .try_init()
}

#[derive(Debug, Clone, PartialEq)]
pub enum RobotEvent {
    MotionStarted { kind: MotionKind, max_velocity: f64 },
    MotionSettled(MotionReport),
    MotionFailed { kind: MotionKind, error: ChassisError },
    ModeChanged(ModeChange),
    AutonStarted { routine: String },
    AutonFinished { routine: String, failed_steps: usize },
    AutonAborted { routine: String },
    HardwareFault { context: &'static str, error: HardwareError },
}

impl RobotEvent {
    pub fn target(&self) -> &'static str {
        match self {
            Self::MotionStarted { .. } | Self::MotionSettled(_) | Self::MotionFailed { .. } => {
                "motion"
            }
            Self::ModeChanged(_) => "modes",
            Self::AutonStarted { .. } | Self::AutonFinished { .. } | Self::AutonAborted { .. } => {
                "auton"
            }
            Self::HardwareFault { .. } => "hardware",
        }
    }

    pub fn is_failure(&self) -> bool {
        match self {
            Self::MotionFailed { .. } | Self::AutonAborted { .. } | Self::HardwareFault { .. } => {
                true
            }
            Self::AutonFinished { failed_steps, .. } => *failed_steps > 0,
            _ => false,
        }
    }
}

impl fmt::Display for RobotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MotionStarted { kind, max_velocity } => {
                write!(f, "motion started kind={kind} max_velocity={max_velocity}rpm")
            }
            Self::MotionSettled(r) => write!(
                f,
                "motion settled kind={} ticks={} error={:.2} pose=({:.1}, {:.1}, {:.1}deg)",
                r.kind, r.ticks, r.error, r.pose.x, r.pose.y, r.pose.heading
            ),
            Self::MotionFailed { kind, error } => {
                write!(f, "motion failed kind={kind} error=\"{error}\"")
            }
            Self::ModeChanged(change) => write!(f, "mode changed {change}"),
            Self::AutonStarted { routine } => write!(f, "autonomous started routine={routine}"),
            Self::AutonFinished {
                routine,
                failed_steps,
            } => write!(
                f,
                "autonomous finished routine={routine} failed_steps={failed_steps}"
            ),
            Self::AutonAborted { routine } => write!(f, "autonomous aborted routine={routine}"),
            Self::HardwareFault { context, error } => {
                write!(f, "hardware fault context={context} error=\"{error}\"")
            }
        }
    }
}

/// Chooses the severity of each [`RobotEvent`] for practice or competition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventLog {
    competition: bool,
}

impl EventLog {
    pub fn new(competition: bool) -> Self {
        Self { competition }
    }

    pub fn level(&self, event: &RobotEvent) -> Level {
        match (event.is_failure(), self.competition) {
            (false, false) => Level::Info,
            (false, true) => Level::Debug,
            (true, false) => Level::Warn,
            (true, true) => Level::Error,
        }
    }

    pub fn emit(&self, event: RobotEvent) {
        log::log!(target: event.target(), self.level(&event), "{event}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::SpeedMode;

    #[test]
    fn competition_quiets_routine_events() {
        let changed = RobotEvent::ModeChanged(ModeChange::Speed(SpeedMode::Slow));
        assert_eq!(EventLog::new(false).level(&changed), Level::Info);
        assert_eq!(EventLog::new(true).level(&changed), Level::Debug);
    }

    #[test]
    fn failures_escalate_in_competition() {
        let failed = RobotEvent::MotionFailed {
            kind: MotionKind::Turn(90.0),
            error: ChassisError::MotionTimeout {
                ticks: 500,
                remaining: 12.0,
            },
        };
        assert_eq!(EventLog::new(false).level(&failed), Level::Warn);
        assert_eq!(EventLog::new(true).level(&failed), Level::Error);
        assert_eq!(failed.target(), "motion");
    }

    #[test]
    fn auton_with_failed_steps_is_a_failure() {
        let clean = RobotEvent::AutonFinished {
            routine: "simple".into(),
            failed_steps: 0,
        };
        let dirty = RobotEvent::AutonFinished {
            routine: "simple".into(),
            failed_steps: 1,
        };
        assert!(!clean.is_failure());
        assert!(dirty.is_failure());
    }

    #[test]
    fn log_levels_follow_mode() {
        assert_eq!(LogConfig::default().level(), LevelFilter::Info);
        let competition = LogConfig {
            competition: true,
            verbose: true,
        };
        assert_eq!(competition.level(), LevelFilter::Warn);
    }
}
