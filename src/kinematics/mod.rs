// Chassis kinematics for four-wheel drivetrains
//
// Converts body-frame velocities (vx, vy, wz) into per-wheel targets.
// Frame: x forward, y left, wz counter-clockwise positive, angles in radians
// with 0 along +x.

mod mecanum;
mod omni;
mod steering;

use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

pub use mecanum::MecanumChassis;
pub use omni::QuadOmniChassis;
pub use steering::SteeringChassis;

/// Wheel index order shared by every chassis
/// (quad-omni uses front, back, left, right instead)
pub const FRONT_LEFT: usize = 0;
pub const FRONT_RIGHT: usize = 1;
pub const REAR_LEFT: usize = 2;
pub const REAR_RIGHT: usize = 3;

/// Error types for chassis construction
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("Chassis {name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f32 },
}

pub(crate) fn check_positive(name: &'static str, value: f32) -> Result<f32, GeometryError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(GeometryError::NonPositive { name, value })
    }
}

/// Body velocity in the chassis frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyVelocity {
    pub vx: f32,
    pub vy: f32,
    pub wz: f32,
}

impl BodyVelocity {
    pub fn new(vx: f32, vy: f32, wz: f32) -> Self {
        Self { vx, vy, wz }
    }
}

/// Last computed wheel outputs of a chassis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WheelTargets {
    /// Wheel surface speeds, same unit as the commanded linear velocity
    pub speeds: [f32; 4],
    /// Steering angles for chassis with steerable modules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angles: Option<[f32; 4]>,
}

/// Forward kinematics shared by every chassis
pub trait ChassisKinematics {
    /// Compute and store wheel targets for a body velocity
    fn forward(&mut self, vx: f32, vy: f32, wz: f32) -> WheelTargets;

    /// Targets from the most recent `forward` call
    fn targets(&self) -> WheelTargets;
}

/// The drivetrain a runtime was configured with
#[derive(Debug, Clone)]
pub enum Drivetrain {
    Mecanum(MecanumChassis),
    Steering(SteeringChassis),
    QuadOmni(QuadOmniChassis),
}

impl Drivetrain {
    pub fn kinematics(&mut self) -> &mut dyn ChassisKinematics {
        match self {
            Drivetrain::Mecanum(chassis) => chassis,
            Drivetrain::Steering(chassis) => chassis,
            Drivetrain::QuadOmni(chassis) => chassis,
        }
    }

    pub fn is_steering(&self) -> bool {
        matches!(self, Drivetrain::Steering(_))
    }
}

/// Wrap an angle into [-π, π)
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    // rem_euclid can round up to TAU for inputs just below a multiple of it
    if wrapped >= PI { wrapped - TAU } else { wrapped }
}

/// Scale all speeds by one common factor so none exceeds `limit` in
/// magnitude. Direction of travel is preserved.
pub fn scale_to_limit(speeds: &mut [f32], limit: f32) {
    let max = speeds.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if limit > 0.0 && max > limit {
        let scale = limit / max;
        for speed in speeds.iter_mut() {
            *speed *= scale;
        }
    }
}
