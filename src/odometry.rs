use crate::units::Length;
use crate::vec::Vec2;

/// Estimated robot pose. `x` points forward from where the pose was last
/// reset, `y` to the right, both in millimetres. `heading` is in degrees and
/// grows clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl Pose {
    pub fn new(x: Length, y: Length, heading: f64) -> Self {
        Self {
            x: x.as_mm(),
            y: y.as_mm(),
            heading,
        }
    }
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

/// Two-encoder differential odometry.
#[derive(Debug, Clone)]
pub struct Odometry {
    pose: Pose,
    track_width: f64,
    // side distances seen on the previous update
    last: Option<(f64, f64)>,
}

impl Odometry {
    pub fn new(track_width: Length) -> Self {
        Self {
            pose: Pose::default(),
            track_width: track_width.as_mm(),
            last: None,
        }
    }

    /// Feeds cumulative left/right travel in millimetres. The first reading
    /// after construction or [`Odometry::reset`] only establishes a baseline.
    pub fn update(&mut self, left: f64, right: f64) {
        let Some((last_left, last_right)) = self.last.replace((left, right)) else {
            return;
        };
        let d_left = left - last_left;
        let d_right = right - last_right;

        let d_heading = ((d_left - d_right) / self.track_width).to_degrees();
        let travelled = (d_left + d_right) / 2.0;

        // integrate along the mid-step heading to follow the arc
        let mid = self.pose.heading + d_heading / 2.0;
        let moved = self.pose.position() + Vec2::from_heading(mid) * travelled;
        self.pose.x = moved.x;
        self.pose.y = moved.y;
        self.pose.heading += d_heading;
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn reset(&mut self, pose: Pose) {
        self.pose = pose;
        self.last = None;
    }
}
