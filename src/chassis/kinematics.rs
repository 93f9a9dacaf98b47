// Differential-drive kinematics
// Converts chassis motion (linear, angular) to per-side wheel speeds and back.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Linear speed of each side's wheel contact point, m/s
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WheelSpeeds {
    pub left: f64,
    pub right: f64,
}

impl WheelSpeeds {
    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Scale both sides down by the same factor so neither exceeds `max_speed`.
    /// Keeps the left/right ratio, and with it the commanded curvature.
    pub fn desaturate(self, max_speed: f64) -> Self {
        let largest = self.left.abs().max(self.right.abs());
        if largest > max_speed && largest > 0.0 {
            let scale = max_speed / largest;
            Self::new(self.left * scale, self.right * scale)
        } else {
            self
        }
    }
}

/// Chassis motion: forward speed (m/s) and counter-clockwise turn rate (rad/s)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisSpeeds {
    pub linear: f64,
    pub angular: f64,
}

/// Stateless conversion parameterized by the track width
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentialKinematics {
    track_width: f64,
}

impl DifferentialKinematics {
    pub fn new(track_width: f64) -> Result<Self, ConfigError> {
        if !track_width.is_finite() || track_width <= 0.0 {
            return Err(ConfigError::TrackWidth(track_width));
        }
        Ok(Self { track_width })
    }

    pub fn track_width(&self) -> f64 {
        self.track_width
    }

    pub fn to_wheel_speeds(&self, chassis: ChassisSpeeds) -> WheelSpeeds {
        let half = chassis.angular * self.track_width / 2.0;
        WheelSpeeds {
            left: chassis.linear - half,
            right: chassis.linear + half,
        }
    }

    pub fn to_chassis_speeds(&self, wheels: WheelSpeeds) -> ChassisSpeeds {
        ChassisSpeeds {
            linear: (wheels.left + wheels.right) / 2.0,
            angular: (wheels.right - wheels.left) / self.track_width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TRACK_WIDTH;

    fn kinematics() -> DifferentialKinematics {
        DifferentialKinematics::new(TRACK_WIDTH).expect("valid track width")
    }

    #[test]
    fn test_zero_velocity() {
        let wheels = kinematics().to_wheel_speeds(ChassisSpeeds::default());
        assert_eq!(wheels, WheelSpeeds::zero());
    }

    #[test]
    fn test_forward_motion() {
        let wheels = kinematics().to_wheel_speeds(ChassisSpeeds {
            linear: 1.0,
            angular: 0.0,
        });
        assert_eq!(wheels.left, 1.0);
        assert_eq!(wheels.right, 1.0);
    }

    #[test]
    fn test_rotation_in_place() {
        // -0.5 / +0.5 m/s on a 0.7407 m track spins at 1/0.7407 rad/s
        let chassis = kinematics().to_chassis_speeds(WheelSpeeds::new(-0.5, 0.5));
        assert_eq!(chassis.linear, 0.0);
        assert!(
            (chassis.angular - 2.0 * 0.5 / 0.7407).abs() < 1e-12,
            "angular {} rad/s",
            chassis.angular
        );
    }

    #[test]
    fn test_round_trip() {
        let k = kinematics();
        for &(left, right) in &[(0.0, 0.0), (1.0, 1.0), (-0.5, 0.5), (3.2, -1.7), (1e-3, 2.5)] {
            let wheels = WheelSpeeds::new(left, right);
            let back = k.to_wheel_speeds(k.to_chassis_speeds(wheels));
            assert!(
                (back.left - left).abs() < 1e-9 && (back.right - right).abs() < 1e-9,
                "round trip drifted: {:?} -> {:?}",
                wheels,
                back
            );
        }
    }

    #[test]
    fn test_rejects_non_positive_track_width() {
        assert!(DifferentialKinematics::new(0.0).is_err());
        assert!(DifferentialKinematics::new(-1.0).is_err());
        assert!(DifferentialKinematics::new(f64::NAN).is_err());
    }

    #[test]
    fn test_desaturate_keeps_ratio() {
        let wheels = WheelSpeeds::new(2.0, 4.0).desaturate(3.0);
        assert!((wheels.right - 3.0).abs() < 1e-12);
        assert!((wheels.left - 1.5).abs() < 1e-12);

        // Already in range: untouched
        let slow = WheelSpeeds::new(-1.0, 0.5);
        assert_eq!(slow.desaturate(3.0), slow);
    }
}
