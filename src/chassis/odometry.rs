// Differential-drive odometry
//
// Position is integrated from the averaged left/right distance deltas rotated
// by the current heading. Heading comes straight from the gyro, which is the
// better heading source than the wheel difference.

use serde::{Deserialize, Serialize};

use super::sensors::SensorSnapshot;

/// Planar pose in the world frame set by the latest reset. Meters and radians,
/// counter-clockwise positive. Heading is not wrapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    pub fn heading_degrees(&self) -> f64 {
        self.heading.to_degrees()
    }
}

#[derive(Debug, Clone)]
pub struct Odometry {
    pose: Pose,
    prev_left: f64,
    prev_right: f64,
    gyro_at_reset: f64,
    heading_at_reset: f64,
}

impl Odometry {
    /// `snapshot` is the reference the first `update` measures from
    pub fn new(initial: Pose, snapshot: &SensorSnapshot) -> Self {
        let mut odometry = Self {
            pose: initial,
            prev_left: 0.0,
            prev_right: 0.0,
            gyro_at_reset: 0.0,
            heading_at_reset: 0.0,
        };
        odometry.reset(initial, snapshot);
        odometry
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Place the robot at `pose` and take the current readings as the new zero
    pub fn reset(&mut self, pose: Pose, snapshot: &SensorSnapshot) {
        self.pose = pose;
        self.prev_left = snapshot.left_position;
        self.prev_right = snapshot.right_position;
        self.gyro_at_reset = snapshot.heading;
        self.heading_at_reset = pose.heading;
    }

    pub fn update(&mut self, snapshot: &SensorSnapshot) -> Pose {
        let delta_left = snapshot.left_position - self.prev_left;
        let delta_right = snapshot.right_position - self.prev_right;
        self.prev_left = snapshot.left_position;
        self.prev_right = snapshot.right_position;

        let heading = self.heading_at_reset + (snapshot.heading - self.gyro_at_reset);
        let distance = (delta_left + delta_right) / 2.0;

        self.pose = Pose {
            x: self.pose.x + distance * heading.cos(),
            y: self.pose.y + distance * heading.sin(),
            heading,
        };
        self.pose
    }
}
