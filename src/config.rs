// Loop timing, topics, robot constants and the validated chassis configuration
use std::f64::consts::PI;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Runtime loop frequency (one control cycle every 20 ms)
pub const LOOP_HZ: u64 = 50;

// Shortest accepted control period
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "chassis/cmd/drive"; // drive requests
pub const TOPIC_CMD_ODOMETRY: &str = "chassis/cmd/odometry"; // pose resets
pub const TOPIC_TELEMETRY: &str = "chassis/state/telemetry"; // pose, distances, outputs
pub const TOPIC_HEALTH: &str = "chassis/state/health"; // health status

// Drive motor CAN ids
pub const LEFT_LEADER_ID: u8 = 19;
pub const LEFT_FOLLOWER_ID: u8 = 21;
pub const RIGHT_LEADER_ID: u8 = 18;
pub const RIGHT_FOLLOWER_ID: u8 = 20;

// Wheel and encoder geometry
pub const WHEEL_DIAMETER: f64 = 0.1524; // meters (6 in)
pub const PULSES_PER_REVOLUTION: f64 = 2048.0; // integrated sensor resolution
pub const GEAR_RATIO: f64 = 9.7; // motor turns per wheel turn
pub const TRACK_WIDTH: f64 = 0.7407; // meters

// Mounting compensation
pub const LEFT_MOTOR_INVERTED: bool = false;
pub const RIGHT_MOTOR_INVERTED: bool = true;
pub const LEFT_SENSOR_PHASE_INVERTED: bool = false;
pub const RIGHT_SENSOR_PHASE_INVERTED: bool = true;

// Electrical limits
pub const VOLTAGE_COMPENSATION: f64 = 10.0; // volts, also the percent-output reference
pub const SUPPLY_CURRENT_LIMIT: f64 = 40.0; // amps

/// Meters travelled per encoder pulse for the default wheel geometry.
pub fn default_distance_per_pulse() -> f64 {
    WHEEL_DIAMETER * PI / PULSES_PER_REVOLUTION / GEAR_RATIO
}

/// Configuration errors. Any of these keeps the drivetrain from activating.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("track width must be positive and finite, got {0}")]
    TrackWidth(f64),

    #[error("distance per pulse must be positive and finite, got {0}")]
    DistancePerPulse(f64),

    #[error("{side} {name} gain must be non-negative and finite, got {value}")]
    Gain {
        side: Side,
        name: &'static str,
        value: f64,
    },

    #[error("voltage limit must be positive and finite, got {0}")]
    VoltageLimit(f64),

    #[error("current limit must be positive and finite, got {0}")]
    CurrentLimit(f64),

    #[error("control period must be finite and at least 1 ms, got {0} s")]
    Period(f64),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One side of the differential chassis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// How a bare `set_output(left, right)` call is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Wheel speeds in m/s through feedforward + PID
    #[default]
    ClosedLoopVelocity,
    /// Power fractions in [-1, 1], no feedback
    OpenLoopPercent,
}

/// Feedback gains for one side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Feedforward gains for one side, in volts, V/(m/s) and V/(m/s^2)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedforwardGains {
    pub ks: f64,
    pub kv: f64,
    pub ka: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SideGains {
    pub pid: PidGains,
    pub feedforward: FeedforwardGains,
}

impl Default for SideGains {
    fn default() -> Self {
        Self {
            pid: PidGains {
                kp: 0.0506,
                ki: 0.0,
                kd: 0.0,
            },
            feedforward: FeedforwardGains {
                ks: 0.04,
                kv: 2.23,
                ka: 0.007,
            },
        }
    }
}

impl SideGains {
    fn validate(&self, side: Side) -> Result<(), ConfigError> {
        let named = [
            ("kP", self.pid.kp),
            ("kI", self.pid.ki),
            ("kD", self.pid.kd),
            ("kS", self.feedforward.ks),
            ("kV", self.feedforward.kv),
            ("kA", self.feedforward.ka),
        ];
        for (name, value) in named {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Gain { side, name, value });
            }
        }
        Ok(())
    }
}

/// Per-side gains; the sides may differ to absorb mechanical asymmetry
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlGains {
    pub left: SideGains,
    pub right: SideGains,
}

impl ControlGains {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.left.validate(Side::Left)?;
        self.right.validate(Side::Right)
    }

    pub fn side(&self, side: Side) -> &SideGains {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

/// Fixed mounting of one drive side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideSetup {
    pub leader_id: u8,
    pub follower_ids: Vec<u8>,
    pub inverted: bool,
    pub sensor_phase_inverted: bool,
}

/// Full chassis configuration, fixed at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChassisConfig {
    pub track_width: f64,
    pub distance_per_pulse: f64,
    pub period_secs: f64,
    pub voltage_limit: f64,
    pub current_limit: f64,
    pub mode: ControlMode,
    pub gains: ControlGains,
    pub left: SideSetup,
    pub right: SideSetup,
}

impl Default for ChassisConfig {
    fn default() -> Self {
        Self {
            track_width: TRACK_WIDTH,
            distance_per_pulse: default_distance_per_pulse(),
            period_secs: 1.0 / LOOP_HZ as f64,
            voltage_limit: VOLTAGE_COMPENSATION,
            current_limit: SUPPLY_CURRENT_LIMIT,
            mode: ControlMode::default(),
            gains: ControlGains::default(),
            left: SideSetup {
                leader_id: LEFT_LEADER_ID,
                follower_ids: vec![LEFT_FOLLOWER_ID],
                inverted: LEFT_MOTOR_INVERTED,
                sensor_phase_inverted: LEFT_SENSOR_PHASE_INVERTED,
            },
            right: SideSetup {
                leader_id: RIGHT_LEADER_ID,
                follower_ids: vec![RIGHT_FOLLOWER_ID],
                inverted: RIGHT_MOTOR_INVERTED,
                sensor_phase_inverted: RIGHT_SENSOR_PHASE_INVERTED,
            },
        }
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

impl ChassisConfig {
    /// Load a JSON config file; missing fields fall back to the defaults above
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !positive(self.track_width) {
            return Err(ConfigError::TrackWidth(self.track_width));
        }
        if !positive(self.distance_per_pulse) {
            return Err(ConfigError::DistancePerPulse(self.distance_per_pulse));
        }
        if !(self.period_secs.is_finite() && self.period_secs >= MIN_PERIOD.as_secs_f64()) {
            return Err(ConfigError::Period(self.period_secs));
        }
        if !positive(self.voltage_limit) {
            return Err(ConfigError::VoltageLimit(self.voltage_limit));
        }
        if !positive(self.current_limit) {
            return Err(ConfigError::CurrentLimit(self.current_limit));
        }
        self.gains.validate()
    }

    pub fn side(&self, side: Side) -> &SideSetup {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}
