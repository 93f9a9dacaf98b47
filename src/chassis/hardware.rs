// Hardware seams for the drive motors and the yaw gyro
//
// Real controllers and the simulated plant both implement these traits, so the
// drivetrain never knows which one it is driving.

/// Errors reported by motor controllers and the gyro
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HardwareError {
    #[error("Timeout waiting for response from device {id}")]
    Timeout { id: u8 },

    #[error("Device {id} reported a fault: {reason}")]
    Fault { id: u8, reason: String },

    #[error("Gyro not responding")]
    GyroUnavailable,
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Static setup pushed to a motor controller once at startup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorSetup {
    pub inverted: bool,
    pub sensor_phase_inverted: bool,
    /// Voltage-compensation saturation; also the largest accepted demand
    pub voltage_limit: f64,
    pub current_limit: f64,
}

/// A smart motor controller with an integrated encoder
pub trait Motor {
    fn id(&self) -> u8;

    fn configure(&mut self, setup: &MotorSetup) -> Result<()>;

    /// Mirror another controller's output from now on
    fn follow(&mut self, leader_id: u8) -> Result<()>;

    /// Demand in volts; phase and inversion are applied by the controller
    fn set_voltage(&mut self, volts: f64) -> Result<()>;

    /// Encoder position in pulses
    fn sensor_position(&mut self) -> Result<f64>;

    /// Encoder velocity in pulses per 100 ms
    fn sensor_velocity(&mut self) -> Result<f64>;

    fn reset_sensor_position(&mut self) -> Result<()>;
}

/// Single-axis yaw gyro
pub trait Gyro {
    /// Accumulated yaw in degrees, clockwise positive
    fn angle_degrees(&mut self) -> Result<f64>;

    /// Make the current orientation read as zero
    fn reset(&mut self) -> Result<()>;
}
