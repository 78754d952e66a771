use thiserror::Error;

/// Faults raised at the brain boundary (motor ports, encoders, controller).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HardwareError {
    #[error("no device responding on port {port}")]
    Disconnected { port: u8 },
    #[error("device on port {port} reported a fault")]
    Faulted { port: u8 },
    #[error("controller is not connected")]
    ControllerDisconnected,
    #[error("brain link failure: {0}")]
    Link(String),
}

/// Failures of chassis operations and closed-loop motions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChassisError {
    /// The motion did not settle within its tick budget (or stalled).
    /// The drive has been force-stopped.
    #[error("motion failed to settle after {ticks} ticks ({remaining:.2} remaining)")]
    MotionTimeout { ticks: u32, remaining: f64 },
    /// A motion was requested while another one is still in flight.
    #[error("a motion is already in flight on this chassis")]
    ConcurrentMotion,
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(#[from] HardwareError),
    #[error("motion cancelled")]
    Cancelled,
}

impl ChassisError {
    /// Errors the control loop should log and ride through.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ConcurrentMotion)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LengthParseError {
    #[error("length `{0}` is missing a unit")]
    MissingUnit(String),
    #[error("invalid length `{input}`: {source}")]
    InvalidNumber {
        input: String,
        source: std::num::ParseFloatError,
    },
    #[error("unknown length unit `{0}`")]
    UnknownUnit(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
