// Drivetrain control component
//
// Owns the sensor interface, the actuators, odometry, kinematics and the
// control law. One `periodic()` call is one control cycle:
// sample sensors -> update odometry -> evaluate control law -> actuate.

use tracing::{info, warn};

use super::actuation::Actuation;
use super::control::{ControlLaw, MotorOutputs, PidController, SimpleMotorFeedforward};
use super::hardware::{Gyro, HardwareError, Motor};
use super::kinematics::{ChassisSpeeds, DifferentialKinematics, WheelSpeeds};
use super::odometry::{Odometry, Pose};
use super::sensors::{EncoderConversion, SensorInterface, SensorSnapshot};
use crate::config::{ChassisConfig, ConfigError, ControlGains, ControlMode, Side};
use crate::messages::Telemetry;

/// Errors that keep the drivetrain from activating
#[derive(Debug, thiserror::Error)]
pub enum ChassisError {
    #[error("Invalid chassis configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Drive hardware setup failed: {0}")]
    Hardware(#[from] HardwareError),
}

/// One cycle's worth of drive demand. Consumed by exactly one `periodic()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveCommand {
    /// Closed loop, m/s per side
    WheelSpeeds(WheelSpeeds),
    /// Open loop, fraction of nominal voltage per side
    Power { left: f64, right: f64 },
}

/// What a trajectory follower needs from a drivetrain. Any hardware backend,
/// including the simulated one, can stand behind it.
pub trait TrajectorySystem {
    /// Interpreted according to the configured control mode
    fn set_output(&mut self, left: f64, right: f64);
    fn pose(&self) -> Pose;
    /// Radians, counter-clockwise positive
    fn heading(&self) -> f64;
    fn kinematics(&self) -> &DifferentialKinematics;
    fn feedforward(&self, side: Side) -> &SimpleMotorFeedforward;
    fn left_pid(&self) -> &PidController;
    fn right_pid(&self) -> &PidController;
}

pub struct Drivetrain<M: Motor, G: Gyro> {
    sensors: SensorInterface<G>,
    actuation: Actuation<M>,
    odometry: Odometry,
    kinematics: DifferentialKinematics,
    control: ControlLaw,
    mode: ControlMode,
    pending: Option<DriveCommand>,
    snapshot: SensorSnapshot,
}

impl<M: Motor, G: Gyro> Drivetrain<M, G> {
    /// Validate the configuration, run the one-time hardware setup, zero the
    /// gyro and start odometry at the origin.
    pub fn new(config: &ChassisConfig, gyro: G, mut actuation: Actuation<M>) -> Result<Self, ChassisError> {
        config.validate()?;
        let kinematics = DifferentialKinematics::new(config.track_width)?;
        let control = ControlLaw::new(&config.gains, config.period_secs, config.voltage_limit)?;

        actuation.configure(config)?;
        let mut sensors = SensorInterface::new(gyro, EncoderConversion::new(config.distance_per_pulse));
        sensors.reset_heading_reference()?;

        let snapshot = sensors.read_snapshot(&mut actuation);
        let odometry = Odometry::new(Pose::default(), &snapshot);

        info!(
            "Drivetrain ready: mode={:?}, track width {} m, {:.6e} m/pulse",
            config.mode, config.track_width, config.distance_per_pulse
        );
        Ok(Self {
            sensors,
            actuation,
            odometry,
            kinematics,
            control,
            mode: config.mode,
            pending: None,
            snapshot,
        })
    }

    /// Run one control cycle and report what happened
    pub fn periodic(&mut self) -> Telemetry {
        let snapshot = self.sensors.read_snapshot(&mut self.actuation);
        self.snapshot = snapshot;
        let pose = self.odometry.update(&snapshot);

        let outputs = match self.pending.take() {
            Some(DriveCommand::WheelSpeeds(desired)) => {
                let measured = WheelSpeeds::new(snapshot.left_velocity, snapshot.right_velocity);
                self.control.compute_command(desired, measured)
            }
            Some(DriveCommand::Power { left, right }) => {
                self.control.disable();
                self.control.compute_open_loop_command(left, right)
            }
            None => {
                self.control.disable();
                MotorOutputs::zero()
            }
        };
        let applied = self.actuation.apply_command(outputs);

        Telemetry {
            x: pose.x,
            y: pose.y,
            heading_deg: pose.heading_degrees(),
            left_distance: snapshot.left_position,
            right_distance: snapshot.right_position,
            left_velocity: snapshot.left_velocity,
            right_velocity: snapshot.right_velocity,
            left_output: applied.left,
            right_output: applied.right,
            saturated: applied.saturated,
            sensors_degraded: self.sensors.is_degraded(),
        }
    }

    pub fn set_command(&mut self, command: DriveCommand) {
        self.pending = Some(command);
    }

    pub fn set_wheel_speeds(&mut self, speeds: WheelSpeeds) {
        self.set_command(DriveCommand::WheelSpeeds(speeds));
    }

    pub fn set_power(&mut self, left: f64, right: f64) {
        self.set_command(DriveCommand::Power { left, right });
    }

    pub fn set_chassis_speeds(&mut self, chassis: ChassisSpeeds) {
        self.set_wheel_speeds(self.kinematics.to_wheel_speeds(chassis));
    }

    pub fn set_output(&mut self, left: f64, right: f64) {
        match self.mode {
            ControlMode::ClosedLoopVelocity => self.set_wheel_speeds(WheelSpeeds::new(left, right)),
            ControlMode::OpenLoopPercent => self.set_power(left, right),
        }
    }

    /// Cut output right away, outside the normal cycle
    pub fn stop(&mut self) {
        self.pending = None;
        self.control.disable();
        self.actuation.stop();
    }

    /// Place the robot at `pose`; the current sensor readings become the new zero
    pub fn reset_odometry(&mut self, pose: Pose) {
        let snapshot = self.sensors.read_snapshot(&mut self.actuation);
        self.snapshot = snapshot;
        self.odometry.reset(pose, &snapshot);
        info!(
            "Odometry reset to x={:.3}, y={:.3}, heading={:.1} deg",
            pose.x,
            pose.y,
            pose.heading_degrees()
        );
    }

    /// Zero encoders and gyro. The estimated pose is kept.
    pub fn zero_all_sensors(&mut self) -> Result<(), HardwareError> {
        let result = self
            .sensors
            .reset_distance_accumulators(&mut self.actuation)
            .and_then(|_| self.sensors.reset_heading_reference());
        if let Err(e) = &result {
            warn!("Sensor zeroing incomplete: {}", e);
        }
        // Re-baseline either way so the next update cannot see a jump
        self.reset_odometry(self.odometry.pose());
        result
    }

    pub fn retune(&mut self, gains: &ControlGains) -> Result<(), ConfigError> {
        self.control.retune(gains)
    }

    pub fn pose(&self) -> Pose {
        self.odometry.pose()
    }

    pub fn heading(&self) -> f64 {
        self.odometry.pose().heading
    }

    /// Measured wheel speeds from the latest snapshot
    pub fn wheel_speeds(&self) -> WheelSpeeds {
        WheelSpeeds::new(self.snapshot.left_velocity, self.snapshot.right_velocity)
    }

    pub fn kinematics(&self) -> &DifferentialKinematics {
        &self.kinematics
    }

    pub fn control(&self) -> &ControlLaw {
        &self.control
    }

    pub fn feedforward(&self, side: Side) -> &SimpleMotorFeedforward {
        self.control.feedforward(side)
    }

    pub fn left_pid(&self) -> &PidController {
        self.control.pid(Side::Left)
    }

    pub fn right_pid(&self) -> &PidController {
        self.control.pid(Side::Right)
    }
}

impl<M: Motor, G: Gyro> TrajectorySystem for Drivetrain<M, G> {
    fn set_output(&mut self, left: f64, right: f64) {
        Drivetrain::set_output(self, left, right)
    }

    fn pose(&self) -> Pose {
        Drivetrain::pose(self)
    }

    fn heading(&self) -> f64 {
        Drivetrain::heading(self)
    }

    fn kinematics(&self) -> &DifferentialKinematics {
        Drivetrain::kinematics(self)
    }

    fn feedforward(&self, side: Side) -> &SimpleMotorFeedforward {
        Drivetrain::feedforward(self, side)
    }

    fn left_pid(&self) -> &PidController {
        Drivetrain::left_pid(self)
    }

    fn right_pid(&self) -> &PidController {
        Drivetrain::right_pid(self)
    }
}

impl<M: Motor, G: Gyro> Drop for Drivetrain<M, G> {
    fn drop(&mut self) {
        // Leave the motors at rest
        self.actuation.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chassis::sim::{SimGyro, SimMotor, SimPlant, SimPlantParams};
    use crate::config::{FeedforwardGains, PidGains};

    const DT: f64 = 0.02;

    fn rig_with(config: &ChassisConfig, params: SimPlantParams) -> (SimPlant, Drivetrain<SimMotor, SimGyro>) {
        let plant = SimPlant::new(params);
        let actuation = plant.actuation(config);
        let drivetrain = Drivetrain::new(config, plant.gyro(), actuation).expect("drivetrain");
        (plant, drivetrain)
    }

    fn rig() -> (SimPlant, Drivetrain<SimMotor, SimGyro>) {
        rig_with(&ChassisConfig::default(), SimPlantParams::default())
    }

    /// Hold a wheel-speed command for `cycles` cycles, then take one more
    /// reading with nothing commanded
    fn drive(plant: &SimPlant, drivetrain: &mut Drivetrain<SimMotor, SimGyro>, speeds: WheelSpeeds, cycles: usize) -> Telemetry {
        for _ in 0..cycles {
            drivetrain.set_wheel_speeds(speeds);
            drivetrain.periodic();
            plant.step(DT);
        }
        drivetrain.periodic()
    }

    #[test]
    fn test_straight_line_one_second() {
        let (plant, mut drivetrain) = rig();
        drive(&plant, &mut drivetrain, WheelSpeeds::new(1.0, 1.0), 50);
        let pose = drivetrain.pose();
        println!("Straight: {:?}, truth {:?}", pose, plant.true_pose());

        assert!((pose.x - 1.0).abs() < 0.05, "x = {}", pose.x);
        assert!(pose.y.abs() < 1e-9, "y = {}", pose.y);
        assert!(pose.heading.abs() < 1e-12, "heading = {}", pose.heading);
        assert!((pose.x - plant.true_pose().x).abs() < 1e-9, "odometry drifted from truth");
    }

    #[test]
    fn test_rotation_in_place_one_second() {
        let (plant, mut drivetrain) = rig();
        let speeds = WheelSpeeds::new(-0.5, 0.5);
        let expected_rate = drivetrain.kinematics().to_chassis_speeds(speeds).angular;
        assert!((expected_rate - 2.0 * 0.5 / 0.7407).abs() < 1e-12);

        drive(&plant, &mut drivetrain, speeds, 50);
        let pose = drivetrain.pose();
        println!("Rotation: {:?}, expected heading {}", pose, expected_rate);

        assert!(pose.x.abs() < 1e-9 && pose.y.abs() < 1e-9, "moved to ({}, {})", pose.x, pose.y);
        assert!((pose.heading - expected_rate).abs() < 0.05, "heading = {}", pose.heading);
        assert!((pose.heading - plant.true_pose().heading).abs() < 1e-9);
    }

    #[test]
    fn test_steady_state_output_is_feedforward() {
        let mut config = ChassisConfig::default();
        let pid = PidGains {
            kp: 0.5,
            ki: 2.0,
            kd: 0.0,
        };
        config.gains.left.pid = pid;
        config.gains.right.pid = pid;
        let (plant, mut drivetrain) = rig_with(&config, SimPlantParams::default());

        let mut last = Telemetry::default();
        for _ in 0..500 {
            drivetrain.set_wheel_speeds(WheelSpeeds::new(1.0, 1.0));
            last = drivetrain.periodic();
            plant.step(DT);
        }

        let ff = drivetrain.feedforward(Side::Left).calculate(1.0, 0.0);
        assert!((last.left_output - ff).abs() < 1e-3, "left output {} vs ff {}", last.left_output, ff);
        assert!((last.right_output - ff).abs() < 1e-3, "right output {} vs ff {}", last.right_output, ff);
        assert!(drivetrain.left_pid().integral_term().abs() < 1e-3);
    }

    #[test]
    fn test_integral_absorbs_model_mismatch() {
        let mut config = ChassisConfig::default();
        let pid = PidGains {
            kp: 0.5,
            ki: 2.0,
            kd: 0.0,
        };
        config.gains.left.pid = pid;
        config.gains.right.pid = pid;
        // Real robot needs more voltage per m/s than the feedforward assumes
        let heavy = FeedforwardGains {
            ks: 0.04,
            kv: 2.4,
            ka: 0.007,
        };
        let params = SimPlantParams {
            left_model: heavy,
            right_model: heavy,
            ..SimPlantParams::default()
        };
        let (plant, mut drivetrain) = rig_with(&config, params);

        let mut last = Telemetry::default();
        for _ in 0..1000 {
            drivetrain.set_wheel_speeds(WheelSpeeds::new(1.0, 1.0));
            last = drivetrain.periodic();
            plant.step(DT);
        }
        assert!((last.left_velocity - 1.0).abs() < 1e-3, "left settled at {}", last.left_velocity);
        assert!((last.left_output - 2.44).abs() < 1e-2, "left output {}", last.left_output);
        assert!((drivetrain.left_pid().integral_term() - 0.17).abs() < 1e-2);
    }

    #[test]
    fn test_reset_then_still_update_yields_pose() {
        let (plant, mut drivetrain) = rig();
        drive(&plant, &mut drivetrain, WheelSpeeds::new(0.8, 0.3), 20);

        let target = Pose::new(2.0, -1.0, 1.2);
        drivetrain.reset_odometry(target);
        drivetrain.periodic();
        assert_eq!(drivetrain.pose(), target);

        drivetrain.reset_odometry(target);
        drivetrain.reset_odometry(target);
        drivetrain.periodic();
        assert_eq!(drivetrain.pose(), target);
    }

    #[test]
    fn test_zero_all_sensors_keeps_pose() {
        let (plant, mut drivetrain) = rig();
        drive(&plant, &mut drivetrain, WheelSpeeds::new(1.0, 0.6), 25);
        let before = drivetrain.pose();

        drivetrain.zero_all_sensors().expect("zero sensors");
        let telemetry = drivetrain.periodic();
        assert_eq!(telemetry.left_distance, 0.0);
        assert_eq!(telemetry.right_distance, 0.0);
        assert_eq!(drivetrain.pose(), before, "zeroing must not move the estimate");
    }

    #[test]
    fn test_power_command_is_clamped() {
        let (plant, mut drivetrain) = rig();
        drivetrain.set_power(2.0, -3.0);
        let telemetry = drivetrain.periodic();
        assert_eq!(telemetry.left_output, 10.0);
        assert_eq!(telemetry.right_output, -10.0);
        assert!(telemetry.saturated);
        assert_eq!(drivetrain.control().saturation_events(), 1);
        assert_eq!(plant.motor_demand(19), Some(10.0));
    }

    #[test]
    fn test_command_consumed_once() {
        let (_plant, mut drivetrain) = rig();
        drivetrain.set_power(0.5, 0.5);
        assert_eq!(drivetrain.periodic().left_output, 5.0);
        assert_eq!(drivetrain.periodic().left_output, 0.0, "no command, no output");
    }

    #[test]
    fn test_set_output_follows_mode() {
        let (_plant, mut drivetrain) = rig();
        drivetrain.set_output(1.0, 1.0);
        // Closed loop at rest: ff(1.0) + kP * 1.0
        let out = drivetrain.periodic().left_output;
        assert!((out - (0.04 + 2.23 + 0.0506)).abs() < 1e-9, "closed-loop output {}", out);

        let config = ChassisConfig {
            mode: ControlMode::OpenLoopPercent,
            ..ChassisConfig::default()
        };
        let (_plant, mut drivetrain) = rig_with(&config, SimPlantParams::default());
        drivetrain.set_output(0.25, -0.25);
        let telemetry = drivetrain.periodic();
        assert_eq!(telemetry.left_output, 2.5);
        assert_eq!(telemetry.right_output, -2.5);
    }

    #[test]
    fn test_open_loop_disables_feedback_state() {
        let mut config = ChassisConfig::default();
        config.gains.left.pid.ki = 5.0;
        let (_plant, mut drivetrain) = rig_with(&config, SimPlantParams::default());
        for _ in 0..10 {
            drivetrain.set_wheel_speeds(WheelSpeeds::new(1.0, 1.0));
            drivetrain.periodic();
        }
        assert!(drivetrain.left_pid().integral_term() > 0.0);
        drivetrain.set_power(0.1, 0.1);
        drivetrain.periodic();
        assert_eq!(drivetrain.left_pid().integral_term(), 0.0);
    }

    #[test]
    fn test_bad_config_never_touches_hardware() {
        let config = ChassisConfig {
            track_width: 0.0,
            ..ChassisConfig::default()
        };
        let plant = SimPlant::new(SimPlantParams::default());
        let actuation = plant.actuation(&config);
        let result = Drivetrain::new(&config, plant.gyro(), actuation);
        assert!(matches!(result, Err(ChassisError::Config(ConfigError::TrackWidth(_)))));
        assert_eq!(plant.configure_count(19), 0);
    }

    #[test]
    fn test_preconfigured_hardware_is_not_reconfigured() {
        let config = ChassisConfig::default();
        let plant = SimPlant::new(SimPlantParams::default());
        let mut actuation = plant.actuation(&config);
        actuation.configure(&config).expect("startup configure");
        let _drivetrain = Drivetrain::new(&config, plant.gyro(), actuation).expect("drivetrain");
        for id in [19, 21, 18, 20] {
            assert_eq!(plant.configure_count(id), 1);
        }
    }

    #[test]
    fn test_nan_yaw_does_not_corrupt_pose() {
        let (plant, mut drivetrain) = rig();
        drive(&plant, &mut drivetrain, WheelSpeeds::new(1.0, 1.0), 10);
        let before = drivetrain.pose();

        plant.override_yaw(Some(f64::NAN));
        let telemetry = drive(&plant, &mut drivetrain, WheelSpeeds::new(1.0, 1.0), 10);
        assert!(telemetry.sensors_degraded);
        assert_eq!(drivetrain.pose(), before, "held snapshot means no movement");

        plant.override_yaw(None);
        let telemetry = drivetrain.periodic();
        assert!(!telemetry.sensors_degraded);
        let pose = drivetrain.pose();
        assert!(pose.x.is_finite() && pose.y.is_finite() && pose.heading.is_finite());
        assert!((pose.x - plant.true_pose().x).abs() < 1e-9, "estimate catches up once the gyro recovers");
    }

    #[test]
    fn test_trajectory_system_is_hardware_agnostic() {
        fn nudge<T: TrajectorySystem>(system: &mut T) -> f64 {
            system.set_output(0.5, 0.5);
            system.kinematics().track_width()
        }
        let (_plant, mut drivetrain) = rig();
        assert_eq!(nudge(&mut drivetrain), 0.7407);
        assert_eq!(TrajectorySystem::pose(&drivetrain), Pose::default());
        assert_eq!(TrajectorySystem::left_pid(&drivetrain).gains().kp, 0.0506);
    }

    #[test]
    fn test_drop_stops_motors() {
        let (plant, mut drivetrain) = rig();
        drivetrain.set_power(0.5, 0.5);
        drivetrain.periodic();
        assert_eq!(plant.motor_demand(19), Some(5.0));
        drop(drivetrain);
        assert_eq!(plant.motor_demand(19), Some(0.0));
    }

    #[test]
    fn test_chassis_speeds_go_through_kinematics() {
        let (_plant, mut drivetrain) = rig();
        drivetrain.set_chassis_speeds(ChassisSpeeds {
            linear: 0.0,
            angular: 2.0,
        });
        let telemetry = drivetrain.periodic();

        // 2 rad/s on a 0.7407 m track is 0.7407 m/s per wheel
        let wheel = 0.7407;
        let expected = 0.04 + 2.23 * wheel + 0.0506 * wheel;
        assert!((telemetry.right_output - expected).abs() < 1e-9, "right {}", telemetry.right_output);
        assert!((telemetry.left_output + expected).abs() < 1e-9, "left {}", telemetry.left_output);
    }

    #[test]
    fn test_retune_replaces_gains() {
        let (_plant, mut drivetrain) = rig();
        let mut gains = ControlGains::default();
        gains.left.pid.kp = 1.0;
        gains.right.pid.kp = 1.0;
        drivetrain.retune(&gains).expect("valid gains");

        drivetrain.set_wheel_speeds(WheelSpeeds::new(1.0, 1.0));
        let out = drivetrain.periodic().left_output;
        assert!((out - (0.04 + 2.23 + 1.0)).abs() < 1e-9, "retuned output {}", out);

        gains.left.pid.kp = -1.0;
        assert!(matches!(drivetrain.retune(&gains), Err(ConfigError::Gain { .. })));
        assert_eq!(drivetrain.left_pid().gains().kp, 1.0, "rejected tune leaves gains alone");
    }

    #[test]
    fn test_second_drivetrain_does_not_reconfigure() {
        let config = ChassisConfig::default();
        let plant = SimPlant::new(SimPlantParams::default());
        let first = Drivetrain::new(&config, plant.gyro(), plant.actuation(&config)).expect("first drivetrain");
        let mut second = Drivetrain::new(&config, plant.gyro(), plant.actuation(&config)).expect("second drivetrain");

        for id in [19, 21, 18, 20] {
            assert_eq!(plant.configure_count(id), 1, "motor {} reconfigured", id);
        }
        assert_eq!(plant.following(21), Some(19));
        assert_eq!(plant.following(20), Some(18));

        drop(first);
        second.set_power(2.0, 0.0);
        assert_eq!(second.periodic().left_output, 10.0, "second drivetrain still clamps");
    }
}
