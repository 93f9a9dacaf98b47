// Drivetrain actuation: two leader/follower motor groups
//
// Followers are wired to their leader once at startup and never commanded
// again. Every per-cycle demand goes to the leaders, clamped to the
// controller's accepted range.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::control::MotorOutputs;
use super::hardware::{Motor, MotorSetup, Result};
use super::sensors::{EncoderReading, EncoderSource};
use crate::config::{ChassisConfig, Side};

static PROCESS_LATCH: OnceLock<StartupLatch> = OnceLock::new();

/// Controller ids that already received their one-time setup. Clones share
/// one set, so every `Actuation` built over the same bus sees the same history.
#[derive(Debug, Clone, Default)]
pub struct StartupLatch {
    configured: Arc<Mutex<BTreeSet<u8>>>,
}

impl StartupLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latch for controllers on this process's bus
    pub fn process() -> Self {
        PROCESS_LATCH.get_or_init(StartupLatch::new).clone()
    }

    fn ids(&self) -> MutexGuard<'_, BTreeSet<u8>> {
        self.configured.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_configured(&self, id: u8) -> bool {
        self.ids().contains(&id)
    }

    /// True if `id` was not yet claimed
    fn claim(&self, id: u8) -> bool {
        self.ids().insert(id)
    }

    fn release(&self, id: u8) {
        self.ids().remove(&id);
    }
}

/// One drive side: the commanded leader and its mirroring followers
pub struct MotorGroup<M> {
    pub leader: M,
    pub followers: Vec<M>,
}

impl<M: Motor> MotorGroup<M> {
    pub fn new(leader: M, followers: Vec<M>) -> Self {
        Self { leader, followers }
    }

    fn motors_mut(&mut self) -> impl Iterator<Item = &mut M> {
        std::iter::once(&mut self.leader).chain(self.followers.iter_mut())
    }
}

/// Demand that actually reached the leaders this cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedOutputs {
    pub left: f64,
    pub right: f64,
    /// At least one side was clamped or replaced
    pub saturated: bool,
}

fn setup_motor<M: Motor>(motor: &mut M, setup: &MotorSetup, leader_id: u8) -> Result<()> {
    motor.configure(setup)?;
    motor.reset_sensor_position()?;
    if motor.id() != leader_id {
        motor.follow(leader_id)?;
    }
    Ok(())
}

pub struct Actuation<M> {
    left: MotorGroup<M>,
    right: MotorGroup<M>,
    voltage_limit: f64,
    latch: StartupLatch,
}

impl<M: Motor> Actuation<M> {
    pub fn new(left: MotorGroup<M>, right: MotorGroup<M>, latch: StartupLatch) -> Self {
        Self {
            left,
            right,
            voltage_limit: 0.0,
            latch,
        }
    }

    /// One-time hardware setup: follower wiring, inversion, sensor phase,
    /// voltage compensation and current limit. A controller already set up
    /// through the same latch is skipped, whichever `Actuation` did it.
    pub fn configure(&mut self, config: &ChassisConfig) -> Result<()> {
        self.voltage_limit = config.voltage_limit;
        let latch = self.latch.clone();
        let mut fresh = 0;

        for side in [Side::Left, Side::Right] {
            let setup = config.side(side);
            let motor_setup = MotorSetup {
                inverted: setup.inverted,
                sensor_phase_inverted: setup.sensor_phase_inverted,
                voltage_limit: config.voltage_limit,
                current_limit: config.current_limit,
            };
            let group = self.group_mut(side);
            let leader_id = group.leader.id();

            for motor in group.motors_mut() {
                let id = motor.id();
                if !latch.claim(id) {
                    debug!("Motor {} already configured, skipping", id);
                    continue;
                }
                info!(
                    "Configuring {} drive motor {} (leader {}), inverted={}, phase inverted={}",
                    side, id, leader_id, setup.inverted, setup.sensor_phase_inverted
                );
                if let Err(e) = setup_motor(motor, &motor_setup, leader_id) {
                    // Let a later attempt retry this controller
                    latch.release(id);
                    return Err(e);
                }
                fresh += 1;
            }
        }

        if fresh > 0 {
            info!("Drive motors configured");
        } else {
            debug!("Drive motors already configured");
        }
        Ok(())
    }

    /// Clamp and forward. Never fails: a bad sample or a write error costs at
    /// most one cycle of output.
    pub fn apply_command(&mut self, outputs: MotorOutputs) -> AppliedOutputs {
        let (left, left_clamped) = self.clamp(outputs.left);
        let (right, right_clamped) = self.clamp(outputs.right);

        if let Err(e) = self.left.leader.set_voltage(left) {
            warn!("Failed to command left drive: {}", e);
        }
        if let Err(e) = self.right.leader.set_voltage(right) {
            warn!("Failed to command right drive: {}", e);
        }

        AppliedOutputs {
            left,
            right,
            saturated: left_clamped || right_clamped,
        }
    }

    pub fn stop(&mut self) -> AppliedOutputs {
        self.apply_command(MotorOutputs::zero())
    }

    /// Zero every encoder on both sides
    pub fn zero_sensors(&mut self) -> Result<()> {
        info!("Zeroing drive encoders");
        for side in [Side::Left, Side::Right] {
            for motor in self.group_mut(side).motors_mut() {
                motor.reset_sensor_position()?;
            }
        }
        Ok(())
    }

    fn clamp(&self, volts: f64) -> (f64, bool) {
        if !volts.is_finite() {
            return (0.0, true);
        }
        let clamped = volts.clamp(-self.voltage_limit, self.voltage_limit);
        (clamped, clamped != volts)
    }

    fn group_mut(&mut self, side: Side) -> &mut MotorGroup<M> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

impl<M: Motor> EncoderSource for Actuation<M> {
    fn read_encoder(&mut self, side: Side) -> Result<EncoderReading> {
        let leader = &mut self.group_mut(side).leader;
        Ok(EncoderReading {
            position: leader.sensor_position()?,
            velocity: leader.sensor_velocity()?,
        })
    }

    fn reset_encoders(&mut self) -> Result<()> {
        self.zero_sensors()
    }
}
