// 50 Hz control loop with watchdog
// Note: the watchdog stops the chassis when drive requests stop arriving, so a
// crashed trajectory follower or teleop cannot leave the robot driving.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

// local imports
use crate::chassis::{Drivetrain, StartupLatch};
use crate::chassis::sim::{SimPlant, SimPlantParams};
use crate::config::{
    CMD_TIMEOUT, ChassisConfig, TOPIC_CMD_DRIVE, TOPIC_CMD_ODOMETRY, TOPIC_HEALTH, TOPIC_TELEMETRY,
};
use crate::messages::{DriveRequest, OdometryRequest, RuntimeHealth};

pub struct Runtime {
    latest_cmd: Option<DriveRequest>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming drive request
    pub fn on_command(&mut self, cmd: DriveRequest, now: Instant) {
        debug!("Received drive request: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = now;
    }

    /// The request to apply this cycle, or None once the watchdog has tripped
    pub fn active_command(&mut self, now: Instant) -> Option<DriveRequest> {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        match self.latest_cmd {
            Some(cmd) if cmd_age <= CMD_TIMEOUT => {
                if self.health != RuntimeHealth::Ok {
                    info!("Drive requests active");
                }
                self.health = RuntimeHealth::Ok;
                Some(cmd)
            }
            Some(_) => {
                // Watchdog triggered - stop the robot
                if self.health != RuntimeHealth::CmdStale {
                    warn!("Drive request stale ({:?} old), stopping chassis", cmd_age);
                }
                self.health = RuntimeHealth::CmdStale;
                None
            }
            None => {
                // No request ever received
                self.health = RuntimeHealth::CmdStale;
                None
            }
        }
    }
}

/// Serialize and publish; failures are logged and otherwise ignored
async fn publish<T: Serialize>(publisher: &zenoh::pubsub::Publisher<'_>, topic: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => {
            if let Err(e) = publisher.put(json).await {
                warn!("Failed to publish on {}: {}", topic, e);
            }
        }
        Err(e) => warn!("Failed to serialize {} message: {}", topic, e),
    }
}

pub async fn run(config: ChassisConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Starting simulated drive hardware");
    let plant = SimPlant::new(SimPlantParams {
        track_width: config.track_width,
        distance_per_pulse: config.distance_per_pulse,
        ..SimPlantParams::default()
    })
    .with_startup_latch(StartupLatch::process());
    let actuation = plant.actuation(&config);
    // Configuration errors stop here, before the loop starts
    let mut drivetrain = Drivetrain::new(&config, plant.gyro(), actuation)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let drive_subscriber = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let odometry_subscriber = session.declare_subscriber(TOPIC_CMD_ODOMETRY).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_secs_f64(config.period_secs));
    // An overrun cycle is dropped, never squeezed in late
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Runtime started: {:.0}Hz loop, {}ms watchdog timeout",
        1.0 / config.period_secs,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_DRIVE, TOPIC_CMD_ODOMETRY);
    info!("Publishing to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Drain all pending drive requests (non-blocking), keep latest
        while let Ok(Some(sample)) = drive_subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveRequest>(&payload) {
                Ok(cmd) => runtime.on_command(cmd, Instant::now()),
                Err(e) => warn!("Failed to parse drive request: {}", e),
            }
        }

        // 2. Odometry maintenance happens between cycles, never mid-update
        while let Ok(Some(sample)) = odometry_subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<OdometryRequest>(&payload) {
                Ok(request) => match request.reset_pose() {
                    Some(pose) => drivetrain.reset_odometry(pose),
                    None => {
                        if let Err(e) = drivetrain.zero_all_sensors() {
                            warn!("Failed to zero sensors: {}", e);
                        }
                    }
                },
                Err(e) => warn!("Failed to parse odometry request: {}", e),
            }
        }

        // 3. Watchdog, then queue this cycle's command
        if let Some(request) = runtime.active_command(Instant::now()) {
            let command = request.to_command(drivetrain.kinematics());
            drivetrain.set_command(command);
        }

        // 4. Sense, estimate, control, actuate
        let telemetry = drivetrain.periodic();
        plant.step(config.period_secs);

        // 5. Publish telemetry and health
        publish(&pub_telemetry, TOPIC_TELEMETRY, &telemetry).await;
        publish(&pub_health, TOPIC_HEALTH, &runtime.health()).await;
    }
}
