// Closed-loop chassis control for a two-sided differential drive
//
// Provides:
// - Sensor interface (encoder pulses + gyro yaw -> per-cycle snapshot)
// - Differential kinematics
// - Odometry
// - Feedforward + PID control law, and open-loop power
// - Leader/follower actuation
// - Drivetrain component tying the above into one control cycle
// - Simulated hardware for tests and bench runs

mod actuation;
pub mod control;
mod drivetrain;
pub mod hardware;
pub mod kinematics;
pub mod odometry;
pub mod sensors;
pub mod sim;

pub use actuation::{Actuation, AppliedOutputs, MotorGroup, StartupLatch};
pub use control::{ControlLaw, MotorOutputs, PidController, SimpleMotorFeedforward};
pub use drivetrain::{ChassisError, DriveCommand, Drivetrain, TrajectorySystem};
pub use hardware::{Gyro, HardwareError, Motor, MotorSetup};
pub use kinematics::{ChassisSpeeds, DifferentialKinematics, WheelSpeeds};
pub use odometry::{Odometry, Pose};
pub use sensors::{EncoderConversion, SensorInterface, SensorSnapshot};
