// Message types exchanged with the runtime over zenoh (JSON payloads)

use serde::{Deserialize, Serialize};

use crate::kinematics::BodyVelocity;
use crate::motor::Feedback;

pub use crate::kinematics::WheelTargets;

// Command from teleop/planner -> runtime
// vx, vy in m/s (x forward, y left), wz in rad/s counter-clockwise
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BaseCommand {
    pub vx: f32,
    pub vy: f32,
    pub wz: f32,
}

impl From<&BaseCommand> for BodyVelocity {
    fn from(cmd: &BaseCommand) -> Self {
        BodyVelocity::new(cmd.vx, cmd.vy, cmd.wz)
    }
}

// Raw motor outputs from the external control loop -> runtime
// drive[i] goes to drive motor id i+1, steer[i] to steer motor id i+1
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MotorCommand {
    pub drive: Vec<i16>,
    #[serde(default)]
    pub steer: Vec<i16>,
}

impl MotorCommand {
    pub fn zero(drive: usize, steer: usize) -> Self {
        Self {
            drive: vec![0; drive],
            steer: vec![0; steer],
        }
    }
}

/// Motor feedback published by runtime; `None` until a motor has reported
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MotorStates {
    pub drive: Vec<Option<Feedback>>,
    pub steer: Vec<Option<Feedback>>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    MotorCmdStale,
}
