// Mecanum chassis (X-configured rollers, fixed wheel orientation)

use super::{check_positive, BodyVelocity, ChassisKinematics, GeometryError, WheelTargets};

/// Four mecanum wheels on a rectangular frame
#[derive(Debug, Clone)]
pub struct MecanumChassis {
    /// Distance between the left and right wheels
    wheel_base: f32,
    /// Distance between the front and rear axles
    wheel_track: f32,
    speeds: [f32; 4],
}

impl MecanumChassis {
    pub fn new(wheel_base: f32, wheel_track: f32) -> Result<Self, GeometryError> {
        Ok(Self {
            wheel_base: check_positive("wheel base", wheel_base)?,
            wheel_track: check_positive("wheel track", wheel_track)?,
            speeds: [0.0; 4],
        })
    }

    /// Lever arm of wz at each wheel
    fn rotation_arm(&self) -> f32 {
        self.wheel_base / 2.0 + self.wheel_track / 2.0
    }

    /// Wheel speeds in front-left, front-right, rear-left, rear-right order
    pub fn speeds(&self) -> [f32; 4] {
        self.speeds
    }

    /// Body velocity that produces the given wheel speeds (odometry)
    pub fn inverse(&self, speeds: [f32; 4]) -> BodyVelocity {
        let [fl, fr, rl, rr] = speeds;
        BodyVelocity {
            vx: (fl + fr + rl + rr) / 4.0,
            vy: (-fl + fr + rl - rr) / 4.0,
            wz: (-fl + fr - rl + rr) / (4.0 * self.rotation_arm()),
        }
    }
}

impl ChassisKinematics for MecanumChassis {
    fn forward(&mut self, vx: f32, vy: f32, wz: f32) -> WheelTargets {
        let rotation = self.rotation_arm() * wz;
        self.speeds = [
            vx - vy - rotation,
            vx + vy + rotation,
            vx + vy - rotation,
            vx - vy + rotation,
        ];
        self.targets()
    }

    fn targets(&self) -> WheelTargets {
        WheelTargets {
            speeds: self.speeds,
            angles: None,
        }
    }
}
