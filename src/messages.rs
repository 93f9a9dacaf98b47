// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::chassis::{ChassisSpeeds, DifferentialKinematics, DriveCommand, Pose, WheelSpeeds};

// Drive request from trajectory followers / manual drive -> runtime
// The mode tag keeps the velocity and power domains apart on the wire too
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DriveRequest {
    /// Wheel speeds in m/s, closed loop
    Velocity { left: f64, right: f64 },
    /// Power fractions in [-1, 1], open loop
    Power { left: f64, right: f64 },
    /// Chassis motion in m/s and rad/s, converted to wheel speeds
    Chassis { linear: f64, angular: f64 },
}

impl DriveRequest {
    pub fn to_command(&self, kinematics: &DifferentialKinematics) -> DriveCommand {
        match *self {
            DriveRequest::Velocity { left, right } => {
                DriveCommand::WheelSpeeds(WheelSpeeds::new(left, right))
            }
            DriveRequest::Power { left, right } => DriveCommand::Power { left, right },
            DriveRequest::Chassis { linear, angular } => DriveCommand::WheelSpeeds(
                kinematics.to_wheel_speeds(ChassisSpeeds { linear, angular }),
            ),
        }
    }
}

// Odometry maintenance, e.g. before an autonomous routine starts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OdometryRequest {
    Reset { x: f64, y: f64, heading_deg: f64 },
    ZeroSensors,
}

impl OdometryRequest {
    pub fn reset_pose(&self) -> Option<Pose> {
        match *self {
            OdometryRequest::Reset { x, y, heading_deg } => {
                Some(Pose::new(x, y, heading_deg.to_radians()))
            }
            OdometryRequest::ZeroSensors => None,
        }
    }
}

/// Per-cycle telemetry published by runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
    pub left_distance: f64,
    pub right_distance: f64,
    pub left_velocity: f64,
    pub right_velocity: f64,
    /// Volts actually sent to the leaders
    pub left_output: f64,
    pub right_output: f64,
    pub saturated: bool,
    pub sensors_degraded: bool,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}
