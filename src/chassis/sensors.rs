// Sensor interface: encoder ticks and gyro yaw -> one SensorSnapshot per cycle

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::hardware::{Gyro, Result};
use crate::config::Side;

/// Encoder velocity is reported per 100 ms
const VELOCITY_WINDOWS_PER_SECOND: f64 = 10.0;

/// Readings taken once per control cycle. Positions in meters, velocities in
/// m/s, heading in radians counter-clockwise positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub left_position: f64,
    pub right_position: f64,
    pub left_velocity: f64,
    pub right_velocity: f64,
    pub heading: f64,
}

impl SensorSnapshot {
    fn is_finite(&self) -> bool {
        [
            self.left_position,
            self.right_position,
            self.left_velocity,
            self.right_velocity,
            self.heading,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Raw encoder reading from a leader motor
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncoderReading {
    /// Pulses
    pub position: f64,
    /// Pulses per 100 ms
    pub velocity: f64,
}

/// Anything that can hand out the two drive-side encoders
pub trait EncoderSource {
    fn read_encoder(&mut self, side: Side) -> Result<EncoderReading>;
    fn reset_encoders(&mut self) -> Result<()>;
}

/// Pulse to distance conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderConversion {
    distance_per_pulse: f64,
}

impl EncoderConversion {
    pub fn new(distance_per_pulse: f64) -> Self {
        Self { distance_per_pulse }
    }

    /// `wheel_diameter * pi / pulses_per_revolution / gear_ratio`
    pub fn from_geometry(wheel_diameter: f64, pulses_per_revolution: f64, gear_ratio: f64) -> Self {
        Self::new(wheel_diameter * PI / pulses_per_revolution / gear_ratio)
    }

    pub fn distance_per_pulse(&self) -> f64 {
        self.distance_per_pulse
    }

    pub fn distance(&self, pulses: f64) -> f64 {
        pulses * self.distance_per_pulse
    }

    /// Pulses per 100 ms -> m/s
    pub fn velocity(&self, pulses_per_window: f64) -> f64 {
        pulses_per_window * self.distance_per_pulse * VELOCITY_WINDOWS_PER_SECOND
    }
}

/// Wraps the gyro and the encoder conversion, and guards odometry against bad
/// samples by falling back to the last good snapshot.
pub struct SensorInterface<G> {
    gyro: G,
    conversion: EncoderConversion,
    last_good: SensorSnapshot,
    degraded: bool,
}

impl<G: Gyro> SensorInterface<G> {
    pub fn new(gyro: G, conversion: EncoderConversion) -> Self {
        Self {
            gyro,
            conversion,
            last_good: SensorSnapshot::default(),
            degraded: false,
        }
    }

    pub fn conversion(&self) -> EncoderConversion {
        self.conversion
    }

    /// True while readings are being replaced by the last good snapshot
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Sample every sensor once. Never fails: read errors and non-finite values
    /// yield the last good snapshot instead.
    pub fn read_snapshot<E: EncoderSource>(&mut self, encoders: &mut E) -> SensorSnapshot {
        match self.sample(encoders) {
            Ok(snapshot) if snapshot.is_finite() => {
                if self.degraded {
                    info!("Sensor readings recovered");
                    self.degraded = false;
                }
                self.last_good = snapshot;
                snapshot
            }
            Ok(snapshot) => {
                if !self.degraded {
                    warn!("Non-finite sensor reading {:?}, holding last good snapshot", snapshot);
                    self.degraded = true;
                }
                self.last_good
            }
            Err(e) => {
                if !self.degraded {
                    warn!("Sensor read failed ({}), holding last good snapshot", e);
                    self.degraded = true;
                }
                self.last_good
            }
        }
    }

    fn sample<E: EncoderSource>(&mut self, encoders: &mut E) -> Result<SensorSnapshot> {
        let left = encoders.read_encoder(Side::Left)?;
        let right = encoders.read_encoder(Side::Right)?;
        // Gyro is clockwise positive; flip to the counter-clockwise convention
        let heading = (-self.gyro.angle_degrees()?).to_radians();

        Ok(SensorSnapshot {
            left_position: self.conversion.distance(left.position),
            right_position: self.conversion.distance(right.position),
            left_velocity: self.conversion.velocity(left.velocity),
            right_velocity: self.conversion.velocity(right.velocity),
            heading,
        })
    }

    pub fn reset_distance_accumulators<E: EncoderSource>(&mut self, encoders: &mut E) -> Result<()> {
        encoders.reset_encoders()?;
        self.last_good.left_position = 0.0;
        self.last_good.right_position = 0.0;
        Ok(())
    }

    pub fn reset_heading_reference(&mut self) -> Result<()> {
        self.gyro.reset()?;
        self.last_good.heading = 0.0;
        Ok(())
    }
}
