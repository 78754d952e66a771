use crate::brain::BatteryInfo;
use crate::modes::{DriveModes, ModeChange};
use crate::odometry::Pose;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotStatus {
    Teleop,
    Autonomous,
    /// A hardware read is failing; control continues degraded.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    /// `None` when the battery could not be read this period.
    pub battery: Option<BatteryInfo>,
    pub pose: Option<Pose>,
    pub modes: DriveModes,
    pub status: RobotStatus,
}

pub trait Display: Send {
    fn mode_changed(&mut self, change: ModeChange, modes: DriveModes);
    fn telemetry(&mut self, snapshot: &Telemetry);
}

/// Display that writes to the log under the `display` target.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl Display for LogDisplay {
    fn mode_changed(&mut self, change: ModeChange, _modes: DriveModes) {
        log::info!(target: "display", "{change}");
    }

    fn telemetry(&mut self, t: &Telemetry) {
        let battery = match t.battery {
            Some(b) => format!("{:.2}V {:.0}%", b.voltage, b.capacity),
            None => "unavailable".to_string(),
        };
        match t.pose {
            Some(p) => log::info!(
                target: "display",
                "status={:?} battery={battery} pose=({:.1}, {:.1}, {:.1}deg)",
                t.status, p.x, p.y, p.heading
            ),
            None => log::info!(target: "display", "status={:?} battery={battery}", t.status),
        }
    }
}

/// Keeps everything it is shown. Lets tests and tools inspect the feed.
#[derive(Debug, Default, Clone)]
pub struct RecordingDisplay {
    pub changes: Vec<ModeChange>,
    pub snapshots: Vec<Telemetry>,
}

impl Display for RecordingDisplay {
    fn mode_changed(&mut self, change: ModeChange, _modes: DriveModes) {
        self.changes.push(change);
    }

    fn telemetry(&mut self, snapshot: &Telemetry) {
        self.snapshots.push(*snapshot);
    }
}

impl<D: Display + ?Sized> Display for std::sync::Arc<parking_lot::Mutex<D>> {
    fn mode_changed(&mut self, change: ModeChange, modes: DriveModes) {
        self.lock().mode_changed(change, modes);
    }

    fn telemetry(&mut self, snapshot: &Telemetry) {
        self.lock().telemetry(snapshot);
    }
}
