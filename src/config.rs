// Timeouts, topics, chassis and motor configuration
use clap::{Parser, ValueEnum};
use std::time::Duration;

use crate::kinematics::{
    Drivetrain, GeometryError, MecanumChassis, QuadOmniChassis, SteeringChassis,
};
use crate::motor::MotorFamily;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 200;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_BASE: &str = "rm/cmd/base"; // body velocity commands
pub const TOPIC_CMD_MOTORS: &str = "rm/cmd/motors"; // raw motor outputs
pub const TOPIC_RT_WHEELS: &str = "rm/rt/wheels"; // wheel targets
pub const TOPIC_STATE_MOTORS: &str = "rm/state/motors"; // motor feedback
pub const TOPIC_HEALTH: &str = "rm/state/health"; // health status

// Every supported chassis has four wheels (and four steer motors when steering)
pub const WHEEL_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Linux SocketCAN interface
    Socketcan,
    /// SLCAN USB-serial adapter
    Slcan,
    /// In-memory bus, no hardware
    Mock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChassisKind {
    Mecanum,
    Steering,
    Omni,
}

/// Error types for invalid runtime configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("Expected {expected} steer encoder offsets, got {got}")]
    SteerOffsets { expected: usize, got: usize },
}

/// Command-line configuration of the runtime
#[derive(Debug, Clone, Parser)]
#[command(name = "rm-chassis-runtime", about = "Chassis kinematics and DJI motor CAN runtime")]
pub struct RuntimeConfig {
    /// CAN backend
    #[arg(long, value_enum, default_value_t = TransportKind::Socketcan)]
    pub transport: TransportKind,

    /// SocketCAN interface name or SLCAN serial port
    #[arg(long, default_value = "can0")]
    pub interface: String,

    #[arg(long, value_enum, default_value_t = ChassisKind::Mecanum)]
    pub chassis: ChassisKind,

    /// Mecanum: distance between left and right wheels (m)
    #[arg(long, default_value_t = 0.4)]
    pub wheel_base: f32,

    /// Mecanum: distance between front and rear axles (m)
    #[arg(long, default_value_t = 0.4)]
    pub wheel_track: f32,

    /// Steering/omni: distance from chassis center to each wheel (m)
    #[arg(long, default_value_t = 0.3)]
    pub radius: f32,

    /// Drive motor family (ids 1-4)
    #[arg(long, value_enum, default_value_t = MotorFamily::M3508)]
    pub drive_family: MotorFamily,

    /// Steer motor family (ids 1-4), steering chassis only
    #[arg(long, value_enum, default_value_t = MotorFamily::Gm6020)]
    pub steer_family: MotorFamily,

    /// Steer encoder readings with each module pointing forward
    #[arg(long, value_delimiter = ',', default_values_t = [0u16, 0, 0, 0])]
    pub steer_offsets: Vec<u16>,

    /// Wheel speed limit; faster targets are scaled down together (m/s)
    #[arg(long, default_value_t = 3.0)]
    pub max_wheel_speed: f32,
}

impl RuntimeConfig {
    /// Build the configured chassis
    pub fn drivetrain(&self) -> Result<Drivetrain, ConfigError> {
        Ok(match self.chassis {
            ChassisKind::Mecanum => {
                Drivetrain::Mecanum(MecanumChassis::new(self.wheel_base, self.wheel_track)?)
            }
            ChassisKind::Steering => Drivetrain::Steering(SteeringChassis::new(self.radius)?),
            ChassisKind::Omni => Drivetrain::QuadOmni(QuadOmniChassis::new(self.radius)?),
        })
    }

    /// Steer encoder offsets, one per module
    pub fn steer_offsets(&self) -> Result<Vec<u16>, ConfigError> {
        if self.steer_offsets.len() != WHEEL_COUNT {
            return Err(ConfigError::SteerOffsets {
                expected: WHEEL_COUNT,
                got: self.steer_offsets.len(),
            });
        }
        Ok(self.steer_offsets.clone())
    }
}
