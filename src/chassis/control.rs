// Control law: velocity feedforward + per-side PID feedback, or open-loop power

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::kinematics::WheelSpeeds;
use crate::config::{ConfigError, ControlGains, FeedforwardGains, PidGains, Side};

/// Motor demand for each side, in volts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorOutputs {
    pub left: f64,
    pub right: f64,
}

impl MotorOutputs {
    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    fn exceeds(&self, limit: f64) -> bool {
        !(self.left.abs() <= limit && self.right.abs() <= limit)
    }
}

/// Sign that is zero at zero, unlike `f64::signum`
fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Permanent-magnet DC motor feedforward: `ks*sign(v) + kv*v + ka*a`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleMotorFeedforward {
    gains: FeedforwardGains,
}

impl SimpleMotorFeedforward {
    pub fn new(gains: FeedforwardGains) -> Self {
        Self { gains }
    }

    pub fn gains(&self) -> FeedforwardGains {
        self.gains
    }

    pub fn calculate(&self, velocity: f64, acceleration: f64) -> f64 {
        self.gains.ks * sign(velocity) + self.gains.kv * velocity + self.gains.ka * acceleration
    }
}

/// Fixed-period PID with a clamped integral contribution
#[derive(Debug, Clone, PartialEq)]
pub struct PidController {
    gains: PidGains,
    period: f64,
    integral_limit: f64,
    integral: f64,
    prev_error: Option<f64>,
}

impl PidController {
    pub fn new(gains: PidGains, period: f64, integral_limit: f64) -> Self {
        Self {
            gains,
            period,
            integral_limit,
            integral: 0.0,
            prev_error: None,
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    /// Current integral contribution to the output (`ki * accumulated error`)
    pub fn integral_term(&self) -> f64 {
        self.gains.ki * self.integral
    }

    pub fn calculate(&mut self, measurement: f64, setpoint: f64) -> f64 {
        let error = setpoint - measurement;

        if self.gains.ki > 0.0 {
            let max_integral = self.integral_limit / self.gains.ki;
            self.integral = (self.integral + error * self.period).clamp(-max_integral, max_integral);
        }

        // No derivative kick on the first sample after a reset
        let derivative = match self.prev_error {
            Some(prev) => (error - prev) / self.period,
            None => 0.0,
        };
        self.prev_error = Some(error);

        self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }
}

/// Feedforward, feedback and acceleration history for one side
#[derive(Debug, Clone)]
struct SideController {
    feedforward: SimpleMotorFeedforward,
    pid: PidController,
    last_setpoint: Option<f64>,
}

impl SideController {
    fn new(gains: &crate::config::SideGains, period: f64, integral_limit: f64) -> Self {
        Self {
            feedforward: SimpleMotorFeedforward::new(gains.feedforward),
            pid: PidController::new(gains.pid, period, integral_limit),
            last_setpoint: None,
        }
    }

    fn calculate(&mut self, desired: f64, measured: f64) -> f64 {
        let acceleration = match self.last_setpoint {
            Some(prev) => (desired - prev) / self.pid.period(),
            None => 0.0,
        };
        self.last_setpoint = Some(desired);
        self.feedforward.calculate(desired, acceleration) + self.pid.calculate(measured, desired)
    }

    fn reset(&mut self) {
        self.pid.reset();
        self.last_setpoint = None;
    }
}

pub struct ControlLaw {
    left: SideController,
    right: SideController,
    period: f64,
    voltage_limit: f64,
    nominal_voltage: f64,
    saturated: bool,
    saturation_events: u64,
}

impl ControlLaw {
    /// `voltage_limit` bounds the actuator and the integral term; open-loop
    /// fractions are scaled by the same value (the voltage-compensation level).
    pub fn new(gains: &ControlGains, period: f64, voltage_limit: f64) -> Result<Self, ConfigError> {
        gains.validate()?;
        if !period.is_finite() || period <= 0.0 {
            return Err(ConfigError::Period(period));
        }
        if !voltage_limit.is_finite() || voltage_limit <= 0.0 {
            return Err(ConfigError::VoltageLimit(voltage_limit));
        }
        Ok(Self {
            left: SideController::new(&gains.left, period, voltage_limit),
            right: SideController::new(&gains.right, period, voltage_limit),
            period,
            voltage_limit,
            nominal_voltage: voltage_limit,
            saturated: false,
            saturation_events: 0,
        })
    }

    /// Closed-loop command: `feedforward(desired) + pid(measured, desired)` per side
    pub fn compute_command(&mut self, desired: WheelSpeeds, measured: WheelSpeeds) -> MotorOutputs {
        let outputs = MotorOutputs {
            left: self.left.calculate(desired.left, measured.left),
            right: self.right.calculate(desired.right, measured.right),
        };
        self.report_range(&outputs);
        outputs
    }

    /// Open-loop command: power fractions map linearly onto the nominal voltage.
    /// Leaves PID state alone; the caller disables the loop separately.
    pub fn compute_open_loop_command(&mut self, left_fraction: f64, right_fraction: f64) -> MotorOutputs {
        let outputs = MotorOutputs {
            left: left_fraction * self.nominal_voltage,
            right: right_fraction * self.nominal_voltage,
        };
        self.report_range(&outputs);
        outputs
    }

    /// Drop accumulated feedback state so idle periods cannot wind up the integral
    pub fn disable(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    /// Swap in new gains. Controller state starts fresh.
    pub fn retune(&mut self, gains: &ControlGains) -> Result<(), ConfigError> {
        gains.validate()?;
        info!("Retuning control law: {:?}", gains);
        self.left = SideController::new(&gains.left, self.period, self.voltage_limit);
        self.right = SideController::new(&gains.right, self.period, self.voltage_limit);
        Ok(())
    }

    pub fn feedforward(&self, side: Side) -> &SimpleMotorFeedforward {
        match side {
            Side::Left => &self.left.feedforward,
            Side::Right => &self.right.feedforward,
        }
    }

    pub fn pid(&self, side: Side) -> &PidController {
        match side {
            Side::Left => &self.left.pid,
            Side::Right => &self.right.pid,
        }
    }

    pub fn voltage_limit(&self) -> f64 {
        self.voltage_limit
    }

    /// Number of times the output entered the out-of-range region
    pub fn saturation_events(&self) -> u64 {
        self.saturation_events
    }

    fn report_range(&mut self, outputs: &MotorOutputs) {
        let out_of_range = outputs.exceeds(self.voltage_limit);
        if out_of_range && !self.saturated {
            self.saturation_events += 1;
            warn!(
                "Control output left={:.3} V, right={:.3} V outside +/-{} V; check gains and setpoints",
                outputs.left, outputs.right, self.voltage_limit
            );
        }
        self.saturated = out_of_range;
    }
}
