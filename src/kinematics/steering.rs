// Four-module independent-steer ("swerve") chassis

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use super::{check_positive, wrap_angle, ChassisKinematics, GeometryError, WheelTargets};

/// Below this module speed the steering angle is undefined and held
const STANDSTILL_EPS: f32 = 1e-6;

/// Mount angle of each module around the chassis center,
/// front-left, front-right, rear-left, rear-right
const MODULE_ANGLES: [f32; 4] = [FRAC_PI_4, -FRAC_PI_4, 3.0 * FRAC_PI_4, -3.0 * FRAC_PI_4];

/// Four steerable wheel modules on a circle of `chassis_radius`
#[derive(Debug, Clone)]
pub struct SteeringChassis {
    /// Module positions relative to the chassis center
    positions: [(f32, f32); 4],
    speeds: [f32; 4],
    angles: [f32; 4],
}

impl SteeringChassis {
    pub fn new(chassis_radius: f32) -> Result<Self, GeometryError> {
        let radius = check_positive("radius", chassis_radius)?;
        Ok(Self {
            positions: MODULE_ANGLES.map(|a| (radius * a.cos(), radius * a.sin())),
            speeds: [0.0; 4],
            angles: [0.0; 4],
        })
    }

    /// Wheel speeds in front-left, front-right, rear-left, rear-right order
    pub fn speeds(&self) -> [f32; 4] {
        self.speeds
    }

    /// Steering angles (radians) in module order
    pub fn angles(&self) -> [f32; 4] {
        self.angles
    }

    /// Velocity of one module's contact point: v + w × r
    fn module_velocity(&self, i: usize, vx: f32, vy: f32, wz: f32) -> (f32, f32) {
        let (rx, ry) = self.positions[i];
        (vx - wz * ry, vy + wz * rx)
    }

    /// Raw target (speed, angle) of a module, `None` when it stands still
    fn module_target(&self, i: usize, vx: f32, vy: f32, wz: f32) -> Option<(f32, f32)> {
        let (mx, my) = self.module_velocity(i, vx, vy, wz);
        let speed = mx.hypot(my);
        if speed < STANDSTILL_EPS {
            None
        } else {
            Some((speed, wrap_angle(my.atan2(mx))))
        }
    }

    /// Forward kinematics with steering optimization.
    ///
    /// `current` holds each module's measured steering angle. When reaching
    /// the raw target would take more than a quarter turn, the module is
    /// steered to the opposite angle and driven in reverse instead, so no
    /// module ever rotates more than 90°. A module commanded to stand still
    /// keeps its current angle.
    pub fn forward_optimized(
        &mut self,
        vx: f32,
        vy: f32,
        wz: f32,
        current: [f32; 4],
    ) -> WheelTargets {
        for i in 0..4 {
            match self.module_target(i, vx, vy, wz) {
                None => {
                    self.speeds[i] = 0.0;
                    self.angles[i] = wrap_angle(current[i]);
                }
                Some((speed, angle)) => {
                    let (speed, angle) = optimize_module(speed, angle, current[i]);
                    self.speeds[i] = speed;
                    self.angles[i] = angle;
                }
            }
        }
        self.targets()
    }
}

/// Pick the (speed, angle) pair needing the least steering from `current`
fn optimize_module(speed: f32, angle: f32, current: f32) -> (f32, f32) {
    let travel = wrap_angle(angle - current);
    if travel.abs() > FRAC_PI_2 {
        (-speed, wrap_angle(angle + PI))
    } else {
        (speed, angle)
    }
}

impl ChassisKinematics for SteeringChassis {
    /// Forward kinematics without steering optimization. A module commanded
    /// to stand still holds its previous target angle.
    fn forward(&mut self, vx: f32, vy: f32, wz: f32) -> WheelTargets {
        for i in 0..4 {
            match self.module_target(i, vx, vy, wz) {
                None => self.speeds[i] = 0.0,
                Some((speed, angle)) => {
                    self.speeds[i] = speed;
                    self.angles[i] = angle;
                }
            }
        }
        self.targets()
    }

    fn targets(&self) -> WheelTargets {
        WheelTargets {
            speeds: self.speeds,
            angles: Some(self.angles),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::{FRONT_LEFT, FRONT_RIGHT, REAR_LEFT, REAR_RIGHT};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPS: f32 = 1e-5;

    fn deg(d: f32) -> f32 {
        d.to_radians()
    }

    fn chassis() -> SteeringChassis {
        SteeringChassis::new(0.3).unwrap()
    }

    /// Translation with every module's raw target at `heading`
    fn heading(chassis: &mut SteeringChassis, heading: f32, current: f32) -> WheelTargets {
        chassis.forward_optimized(heading.cos(), heading.sin(), 0.0, [current; 4])
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(SteeringChassis::new(0.0).is_err());
        assert!(SteeringChassis::new(-0.1).is_err());
    }

    #[test]
    fn test_translation_points_all_modules() {
        let targets = chassis().forward(0.0, 1.0, 0.0);
        let angles = targets.angles.unwrap();
        for i in 0..4 {
            assert!((targets.speeds[i] - 1.0).abs() < EPS);
            assert!((angles[i] - FRAC_PI_2).abs() < EPS);
        }
    }

    #[test]
    fn test_rotation_is_tangential() {
        let radius = 0.3;
        let targets = chassis().forward(0.0, 0.0, 2.0);
        let angles = targets.angles.unwrap();
        let expected = [deg(135.0), deg(45.0), deg(-135.0), deg(-45.0)];
        for i in 0..4 {
            assert!((targets.speeds[i] - 2.0 * radius).abs() < EPS);
            let error = wrap_angle(angles[i] - expected[i]);
            assert!(error.abs() < EPS, "module {}", i);
        }
    }

    #[test]
    fn test_combined_motion_speeds() {
        // Driving forward while turning left: right side runs faster
        let targets = chassis().forward(1.0, 0.0, 1.0);
        assert!(targets.speeds[FRONT_RIGHT] > targets.speeds[FRONT_LEFT]);
        assert!(targets.speeds[REAR_RIGHT] > targets.speeds[REAR_LEFT]);
    }

    #[test]
    fn test_standstill_holds_previous_angle() {
        let mut chassis = chassis();
        chassis.forward(0.0, 1.0, 0.0);
        let targets = chassis.forward(0.0, 0.0, 0.0);
        assert_eq!(targets.speeds, [0.0; 4]);
        for angle in targets.angles.unwrap() {
            assert!((angle - FRAC_PI_2).abs() < EPS);
        }
    }

    #[test]
    fn test_optimized_standstill_holds_current_angle() {
        let mut chassis = chassis();
        let current = [0.1, -0.2, 3.0, -3.0];
        let targets = chassis.forward_optimized(0.0, 0.0, 0.0, current);
        assert_eq!(targets.speeds, [0.0; 4]);
        for (angle, expected) in targets.angles.unwrap().iter().zip(current) {
            assert!((angle - expected).abs() < EPS);
        }
    }

    #[test]
    fn test_flips_beyond_quarter_turn() {
        let targets = heading(&mut chassis(), deg(170.0), 0.0);
        for i in 0..4 {
            assert!((targets.angles.unwrap()[i] - deg(-10.0)).abs() < EPS);
            assert!((targets.speeds[i] + 1.0).abs() < EPS);
        }
    }

    #[test]
    fn test_keeps_target_within_quarter_turn() {
        let targets = heading(&mut chassis(), deg(80.0), 0.0);
        for i in 0..4 {
            assert!((targets.angles.unwrap()[i] - deg(80.0)).abs() < EPS);
            assert!((targets.speeds[i] - 1.0).abs() < EPS);
        }
    }

    #[test]
    fn test_flip_across_wrap() {
        // From 170°, a raw target of -170° is only 20° away
        let targets = heading(&mut chassis(), deg(-170.0), deg(170.0));
        assert!((targets.angles.unwrap()[0] - deg(-170.0)).abs() < EPS);
        assert!(targets.speeds[0] > 0.0);

        // From 170°, a raw target of 0° is reached by reversing at 180°
        let targets = heading(&mut chassis(), 0.0, deg(170.0));
        assert!((targets.angles.unwrap()[0].abs() - PI).abs() < EPS);
        assert!(targets.speeds[0] < 0.0);
    }

    #[test]
    fn test_optimized_never_steers_more_than_quarter_turn() {
        let mut rng = StdRng::seed_from_u64(0x5E4E);
        let mut chassis = SteeringChassis::new(0.35).unwrap();
        let mut plain = SteeringChassis::new(0.35).unwrap();

        for _ in 0..500 {
            let vx = rng.random_range(-3.0f32..3.0);
            let vy = rng.random_range(-3.0f32..3.0);
            let wz = rng.random_range(-6.0f32..6.0);
            let current: [f32; 4] = std::array::from_fn(|_| rng.random_range(-PI..PI));

            let optimized = chassis.forward_optimized(vx, vy, wz, current);
            let raw = plain.forward(vx, vy, wz);
            let angles = optimized.angles.unwrap();
            let raw_angles = raw.angles.unwrap();

            for i in 0..4 {
                let travel = wrap_angle(angles[i] - current[i]).abs();
                assert!(travel <= FRAC_PI_2 + EPS, "module {} steers {}", i, travel);
                assert!((-PI..PI).contains(&angles[i]));
                // Same wheel velocity vector, possibly expressed reversed
                assert!((optimized.speeds[i].abs() - raw.speeds[i]).abs() < 1e-4);
                let ox = optimized.speeds[i] * angles[i].cos();
                let oy = optimized.speeds[i] * angles[i].sin();
                let rx = raw.speeds[i] * raw_angles[i].cos();
                let ry = raw.speeds[i] * raw_angles[i].sin();
                assert!((ox - rx).abs() < 1e-3 && (oy - ry).abs() < 1e-3);
            }
        }
    }
}
