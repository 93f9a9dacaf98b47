// Simulated drive hardware
//
// A two-sided first-order DC drive model behind the same Motor/Gyro traits as
// the real controllers. Each side responds to its mean motor voltage with the
// inverse of the feedforward model, stepped with exact exponential
// discretisation so stiff parameters stay stable at a 20 ms step.
//
// Handles share one plant through Arc<Mutex<_>>; the runtime and tests step it
// between control cycles.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::actuation::{Actuation, MotorGroup, StartupLatch};
use super::hardware::{Gyro, HardwareError, Motor, MotorSetup, Result};
use super::kinematics::WheelSpeeds;
use super::odometry::Pose;
use crate::config::{
    ChassisConfig, FeedforwardGains, Side, TRACK_WIDTH, default_distance_per_pulse,
};

/// Controllers accept up to battery voltage until configured otherwise
const DEFAULT_MOTOR_VOLTAGE_LIMIT: f64 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimPlantParams {
    /// Physical response of each side, expressed as feedforward gains
    pub left_model: FeedforwardGains,
    pub right_model: FeedforwardGains,
    pub track_width: f64,
    pub distance_per_pulse: f64,
    /// The right gearbox is mounted mirrored: positive shaft voltage drives
    /// that wheel backwards
    pub left_mount_reversed: bool,
    pub right_mount_reversed: bool,
}

impl Default for SimPlantParams {
    fn default() -> Self {
        let model = FeedforwardGains {
            ks: 0.04,
            kv: 2.23,
            ka: 0.007,
        };
        Self {
            left_model: model,
            right_model: model,
            track_width: TRACK_WIDTH,
            distance_per_pulse: default_distance_per_pulse(),
            left_mount_reversed: false,
            right_mount_reversed: true,
        }
    }
}

#[derive(Debug, Clone)]
struct MotorState {
    side: Side,
    inverted: bool,
    sensor_phase_inverted: bool,
    follows: Option<u8>,
    demand: f64,
    voltage_limit: f64,
    current_limit: f64,
    configure_count: u32,
    position_offset: f64,
    failing: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct SideState {
    velocity: f64,
    distance: f64,
}

#[derive(Debug)]
struct PlantState {
    params: SimPlantParams,
    motors: BTreeMap<u8, MotorState>,
    left: SideState,
    right: SideState,
    pose: Pose,
    gyro_zero: f64,
    yaw_override: Option<f64>,
}

fn sign(reversed: bool) -> f64 {
    if reversed { -1.0 } else { 1.0 }
}

impl PlantState {
    fn motor(&self, id: u8) -> Result<&MotorState> {
        match self.motors.get(&id) {
            Some(m) if !m.failing => Ok(m),
            _ => Err(HardwareError::Timeout { id }),
        }
    }

    fn motor_mut(&mut self, id: u8) -> Result<&mut MotorState> {
        match self.motors.get_mut(&id) {
            Some(m) if !m.failing => Ok(m),
            _ => Err(HardwareError::Timeout { id }),
        }
    }

    fn mount_sign(&self, side: Side) -> f64 {
        match side {
            Side::Left => sign(self.params.left_mount_reversed),
            Side::Right => sign(self.params.right_mount_reversed),
        }
    }

    fn side_state(&self, side: Side) -> SideState {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// Voltage at the wheel, averaged over every motor on the side
    fn wheel_voltage(&self, side: Side) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for motor in self.motors.values().filter(|m| m.side == side) {
            let demand = match motor.follows {
                Some(leader) => self.motors.get(&leader).map_or(0.0, |l| l.demand),
                None => motor.demand,
            };
            let shaft = demand.clamp(-motor.voltage_limit, motor.voltage_limit) * sign(motor.inverted);
            total += shaft * self.mount_sign(side);
            count += 1;
        }
        if count == 0 { 0.0 } else { total / count as f64 }
    }

    /// Raw sensor pulses before the reset offset
    fn raw_pulses(&self, motor: &MotorState) -> f64 {
        let wheel = self.side_state(motor.side).distance;
        wheel * self.mount_sign(motor.side) * sign(motor.sensor_phase_inverted)
            / self.params.distance_per_pulse
    }
}

/// Advance one side; returns the distance covered during `dt`
fn step_side(state: &mut SideState, model: &FeedforwardGains, volts: f64, dt: f64) -> f64 {
    let drive = if volts.abs() > model.ks {
        volts - model.ks * volts.signum()
    } else {
        0.0
    };
    let steady = drive / model.kv;
    let tau = model.ka / model.kv;
    let decay = (-dt / tau).exp();

    let start = state.velocity;
    let travelled = steady * dt + (start - steady) * tau * (1.0 - decay);
    state.velocity = steady + (start - steady) * decay;
    state.distance += travelled;
    travelled
}

/// Shared handle to the simulated chassis. Each plant is its own bus, with
/// its own record of which controllers were set up.
#[derive(Debug, Clone)]
pub struct SimPlant {
    state: Arc<Mutex<PlantState>>,
    latch: StartupLatch,
}

impl SimPlant {
    pub fn new(params: SimPlantParams) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlantState {
                params,
                motors: BTreeMap::new(),
                left: SideState::default(),
                right: SideState::default(),
                pose: Pose::default(),
                gyro_zero: 0.0,
                yaw_override: None,
            })),
            latch: StartupLatch::new(),
        }
    }

    /// Share `latch` with every actuation built from this plant
    pub fn with_startup_latch(mut self, latch: StartupLatch) -> Self {
        self.latch = latch;
        self
    }

    pub fn startup_latch(&self) -> &StartupLatch {
        &self.latch
    }

    fn lock(&self) -> MutexGuard<'_, PlantState> {
        // A poisoned lock still holds usable plant state
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create motor handles for the ids in `config`, grouped by side
    pub fn actuation(&self, config: &ChassisConfig) -> Actuation<SimMotor> {
        let left = self.group(Side::Left, config);
        let right = self.group(Side::Right, config);
        Actuation::new(left, right, self.latch.clone())
    }

    fn group(&self, side: Side, config: &ChassisConfig) -> MotorGroup<SimMotor> {
        let setup = config.side(side);
        let leader = self.motor(setup.leader_id, side);
        let followers = setup
            .follower_ids
            .iter()
            .map(|&id| self.motor(id, side))
            .collect();
        MotorGroup::new(leader, followers)
    }

    /// A handle to controller `id`; an existing controller keeps its state
    fn motor(&self, id: u8, side: Side) -> SimMotor {
        self.lock().motors.entry(id).or_insert_with(|| MotorState {
            side,
            inverted: false,
            sensor_phase_inverted: false,
            follows: None,
            demand: 0.0,
            voltage_limit: DEFAULT_MOTOR_VOLTAGE_LIMIT,
            current_limit: f64::INFINITY,
            configure_count: 0,
            position_offset: 0.0,
            failing: false,
        });
        SimMotor {
            id,
            plant: self.clone(),
        }
    }

    pub fn gyro(&self) -> SimGyro {
        SimGyro { plant: self.clone() }
    }

    /// Advance the physics by `dt` seconds
    pub fn step(&self, dt: f64) {
        let mut s = self.lock();
        let left_volts = s.wheel_voltage(Side::Left);
        let right_volts = s.wheel_voltage(Side::Right);
        let (left_model, right_model, track_width) =
            (s.params.left_model, s.params.right_model, s.params.track_width);

        let dl = step_side(&mut s.left, &left_model, left_volts, dt);
        let dr = step_side(&mut s.right, &right_model, right_volts, dt);

        // Arc integration at the mid-step heading
        let dtheta = (dr - dl) / track_width;
        let mid = s.pose.heading + dtheta / 2.0;
        let d = (dl + dr) / 2.0;
        s.pose.x += d * mid.cos();
        s.pose.y += d * mid.sin();
        s.pose.heading += dtheta;
    }

    /// Ground-truth pose since the plant was created
    pub fn true_pose(&self) -> Pose {
        self.lock().pose
    }

    pub fn wheel_speeds(&self) -> WheelSpeeds {
        let s = self.lock();
        WheelSpeeds::new(s.left.velocity, s.right.velocity)
    }

    pub fn motor_demand(&self, id: u8) -> Option<f64> {
        self.lock().motors.get(&id).map(|m| m.demand)
    }

    pub fn configure_count(&self, id: u8) -> u32 {
        self.lock().motors.get(&id).map_or(0, |m| m.configure_count)
    }

    pub fn following(&self, id: u8) -> Option<u8> {
        self.lock().motors.get(&id).and_then(|m| m.follows)
    }

    pub fn current_limit(&self, id: u8) -> Option<f64> {
        self.lock().motors.get(&id).map(|m| m.current_limit)
    }

    /// Make a controller stop answering
    pub fn fail_motor(&self, id: u8, failing: bool) {
        if let Some(m) = self.lock().motors.get_mut(&id) {
            m.failing = failing;
        }
    }

    /// Force the gyro to report `yaw` (e.g. NaN) instead of the true heading
    pub fn override_yaw(&self, yaw: Option<f64>) {
        self.lock().yaw_override = yaw;
    }
}

/// Simulated smart motor controller
#[derive(Debug)]
pub struct SimMotor {
    id: u8,
    plant: SimPlant,
}

impl Motor for SimMotor {
    fn id(&self) -> u8 {
        self.id
    }

    fn configure(&mut self, setup: &MotorSetup) -> Result<()> {
        let mut s = self.plant.lock();
        let m = s.motor_mut(self.id)?;
        m.inverted = setup.inverted;
        m.sensor_phase_inverted = setup.sensor_phase_inverted;
        m.voltage_limit = setup.voltage_limit;
        m.current_limit = setup.current_limit;
        m.configure_count += 1;
        Ok(())
    }

    fn follow(&mut self, leader_id: u8) -> Result<()> {
        let mut s = self.plant.lock();
        s.motor(leader_id)?;
        s.motor_mut(self.id)?.follows = Some(leader_id);
        Ok(())
    }

    fn set_voltage(&mut self, volts: f64) -> Result<()> {
        let mut s = self.plant.lock();
        let m = s.motor_mut(self.id)?;
        m.follows = None;
        m.demand = volts;
        Ok(())
    }

    fn sensor_position(&mut self) -> Result<f64> {
        let s = self.plant.lock();
        let m = s.motor(self.id)?;
        Ok(s.raw_pulses(m) - m.position_offset)
    }

    fn sensor_velocity(&mut self) -> Result<f64> {
        let s = self.plant.lock();
        let m = s.motor(self.id)?;
        let wheel = s.side_state(m.side).velocity;
        let pulses_per_second = wheel * s.mount_sign(m.side) * sign(m.sensor_phase_inverted)
            / s.params.distance_per_pulse;
        Ok(pulses_per_second / 10.0)
    }

    fn reset_sensor_position(&mut self) -> Result<()> {
        let mut s = self.plant.lock();
        let raw = {
            let m = s.motor(self.id)?;
            s.raw_pulses(m)
        };
        s.motor_mut(self.id)?.position_offset = raw;
        Ok(())
    }
}

/// Simulated yaw gyro; reports clockwise-positive degrees like the real one
#[derive(Debug)]
pub struct SimGyro {
    plant: SimPlant,
}

impl Gyro for SimGyro {
    fn angle_degrees(&mut self) -> Result<f64> {
        let s = self.plant.lock();
        if let Some(yaw) = s.yaw_override {
            return Ok(yaw);
        }
        Ok(-(s.pose.heading - s.gyro_zero).to_degrees())
    }

    fn reset(&mut self) -> Result<()> {
        let mut s = self.plant.lock();
        s.gyro_zero = s.pose.heading;
        Ok(())
    }
}
