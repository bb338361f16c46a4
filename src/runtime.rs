// Fixed-rate chassis loop with watchdog
// Note: if the teleop/planner or the motor control loop stops publishing,
// the watchdog zeroes body velocity or motor outputs instead of replaying
// the last command forever.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::can::{CanTransport, MockTransport, SlcanTransport, TransportError};
use crate::config::{
    RuntimeConfig, TransportKind, CMD_TIMEOUT, LOOP_HZ, TOPIC_CMD_BASE, TOPIC_CMD_MOTORS,
    TOPIC_HEALTH, TOPIC_RT_WHEELS, TOPIC_STATE_MOTORS, WHEEL_COUNT,
};
use crate::kinematics::{scale_to_limit, BodyVelocity, Drivetrain, WheelTargets};
use crate::messages::{BaseCommand, MotorCommand, RuntimeHealth};
use crate::motor::{MotorBus, MotorSet};

pub struct Runtime {
    drivetrain: Drivetrain,
    max_wheel_speed: f32,
    latest_cmd: Option<BaseCommand>,
    cmd_received_at: Instant,
    latest_motor_cmd: Option<MotorCommand>,
    motor_cmd_received_at: Instant,
    base_stale: bool,
    motors_stale: bool,
}

impl Runtime {
    pub fn new(drivetrain: Drivetrain, max_wheel_speed: f32) -> Self {
        let now = Instant::now();
        Self {
            drivetrain,
            max_wheel_speed,
            latest_cmd: None,
            cmd_received_at: now,
            latest_motor_cmd: None,
            motor_cmd_received_at: now,
            // Start stale until first commands
            base_stale: true,
            motors_stale: true,
        }
    }

    /// Process incoming body velocity command
    pub fn on_command(&mut self, cmd: BaseCommand, now: Instant) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = now;
    }

    /// Process incoming motor output command
    pub fn on_motor_command(&mut self, cmd: MotorCommand, now: Instant) {
        debug!("Received motor command: {:?}", &cmd);
        self.latest_motor_cmd = Some(cmd);
        self.motor_cmd_received_at = now;
    }

    pub fn health(&self) -> RuntimeHealth {
        if self.base_stale {
            RuntimeHealth::CmdStale
        } else if self.motors_stale {
            RuntimeHealth::MotorCmdStale
        } else {
            RuntimeHealth::Ok
        }
    }

    /// Body velocity to drive this tick (includes watchdog)
    fn body_velocity(&mut self, now: Instant) -> BodyVelocity {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        match self.latest_cmd {
            Some(ref cmd) if cmd_age <= CMD_TIMEOUT => {
                self.base_stale = false;
                BodyVelocity::from(cmd)
            }
            Some(_) => {
                // Watchdog triggered - stop the chassis
                if !self.base_stale {
                    warn!("Command stale ({:?} old), stopping chassis", cmd_age);
                }
                self.base_stale = true;
                BodyVelocity::default()
            }
            None => {
                self.base_stale = true;
                BodyVelocity::default()
            }
        }
    }

    /// Wheel targets for this tick. Steering chassis optimize module
    /// rotation once every steer motor has reported an angle.
    pub fn compute_targets(
        &mut self,
        now: Instant,
        steer_angles: Option<Vec<f32>>,
    ) -> WheelTargets {
        let body = self.body_velocity(now);
        let current = steer_angles
            .and_then(|a| <[f32; WHEEL_COUNT]>::try_from(a.as_slice()).ok());

        let mut targets = match (&mut self.drivetrain, current) {
            (Drivetrain::Steering(chassis), Some(current)) => {
                chassis.forward_optimized(body.vx, body.vy, body.wz, current)
            }
            (drivetrain, _) => drivetrain.kinematics().forward(body.vx, body.vy, body.wz),
        };
        scale_to_limit(&mut targets.speeds, self.max_wheel_speed);
        targets
    }

    /// Motor outputs for this tick; all zero when the command is stale
    pub fn motor_output(&mut self, now: Instant, drive: usize, steer: usize) -> MotorCommand {
        let cmd_age = now.saturating_duration_since(self.motor_cmd_received_at);

        match self.latest_motor_cmd {
            Some(ref cmd) if cmd_age <= CMD_TIMEOUT => {
                self.motors_stale = false;
                cmd.clone()
            }
            Some(_) => {
                if !self.motors_stale {
                    warn!("Motor command stale ({:?} old), zeroing outputs", cmd_age);
                }
                self.motors_stale = true;
                MotorCommand::zero(drive, steer)
            }
            None => {
                self.motors_stale = true;
                MotorCommand::zero(drive, steer)
            }
        }
    }
}

/// Open the configured CAN backend
pub fn open_transport(config: &RuntimeConfig) -> Result<Arc<dyn CanTransport>, TransportError> {
    Ok(match config.transport {
        #[cfg(target_os = "linux")]
        TransportKind::Socketcan => {
            Arc::new(crate::can::SocketCanTransport::open(&config.interface)?)
        }
        #[cfg(not(target_os = "linux"))]
        TransportKind::Socketcan => {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "SocketCAN is only available on Linux",
            )));
        }
        TransportKind::Slcan => Arc::new(SlcanTransport::open(&config.interface)?),
        TransportKind::Mock => {
            warn!("Using mock CAN transport, no motor will move");
            Arc::new(MockTransport::new())
        }
    })
}

pub async fn run(config: RuntimeConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let drivetrain = config.drivetrain()?;
    let transport = open_transport(&config)?;
    let bus = MotorBus::new(transport);

    let mut motors = MotorSet::new(&bus, config.drive_family, WHEEL_COUNT as u8)?;
    if drivetrain.is_steering() {
        motors = motors.with_steering(&bus, config.steer_family, config.steer_offsets()?)?;
    }
    let _listener = bus.spawn_listener()?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_base = session.declare_subscriber(TOPIC_CMD_BASE).await?;
    let sub_motors = session.declare_subscriber(TOPIC_CMD_MOTORS).await?;
    let pub_wheels = session.declare_publisher(TOPIC_RT_WHEELS).await?;
    let pub_motors = session.declare_publisher(TOPIC_STATE_MOTORS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(drivetrain, config.max_wheel_speed);
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {:?} chassis, {}Hz loop, {}ms watchdog timeout",
        config.chassis,
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_BASE, TOPIC_CMD_MOTORS);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_RT_WHEELS, TOPIC_STATE_MOTORS, TOPIC_HEALTH
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
        let now = Instant::now();

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_base.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<BaseCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd, now),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_motors.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MotorCommand>(&payload) {
                Ok(cmd) => runtime.on_motor_command(cmd, now),
                Err(e) => warn!("Failed to parse motor command: {}", e),
            }
        }

        // 2. Kinematics (includes watchdog)
        let steer_angles = if motors.steer().is_empty() {
            None
        } else {
            motors.steer_angles()
        };
        let targets = runtime.compute_targets(now, steer_angles);

        // 3. Motor outputs; a failed send is reported, next tick sends fresh values
        let output = runtime.motor_output(now, motors.drive().len(), motors.steer().len());
        match motors.apply(&output) {
            Ok(()) => {}
            Err(TransportError::Busy) => debug!("CAN busy, motor frame dropped"),
            Err(e) => warn!("Failed to send motor command: {}", e),
        }

        // 4. Publish wheel targets, motor feedback and health
        pub_wheels.put(serde_json::to_string(&targets)?).await?;
        pub_motors.put(serde_json::to_string(&motors.states())?).await?;
        pub_health.put(serde_json::to_string(&runtime.health())?).await?;
    }

    Ok(())
}
