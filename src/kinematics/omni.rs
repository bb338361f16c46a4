// Four omni wheels at front, back, left and right of a round chassis

use super::{check_positive, BodyVelocity, ChassisKinematics, GeometryError, WheelTargets};

/// Quad omni-wheel chassis. Each wheel rolls tangentially to the chassis
/// circle at distance `chassis_radius` from the center, positive speed
/// driving counter-clockwise.
#[derive(Debug, Clone)]
pub struct QuadOmniChassis {
    chassis_radius: f32,
    /// front, back, left, right
    speeds: [f32; 4],
}

impl QuadOmniChassis {
    pub fn new(chassis_radius: f32) -> Result<Self, GeometryError> {
        Ok(Self {
            chassis_radius: check_positive("radius", chassis_radius)?,
            speeds: [0.0; 4],
        })
    }

    /// Wheel speeds in front, back, left, right order
    pub fn speeds(&self) -> [f32; 4] {
        self.speeds
    }

    /// Reconstruct the body velocity from observed wheel speeds.
    ///
    /// This is the least-squares inverse of `forward`'s matrix, so
    /// `inverse(forward(v)) == v` for every body velocity.
    pub fn inverse(&self, front: f32, back: f32, left: f32, right: f32) -> BodyVelocity {
        BodyVelocity {
            vx: (right - left) / 2.0,
            vy: (front - back) / 2.0,
            wz: (front + back + left + right) / (4.0 * self.chassis_radius),
        }
    }
}

impl ChassisKinematics for QuadOmniChassis {
    fn forward(&mut self, vx: f32, vy: f32, wz: f32) -> WheelTargets {
        let rotation = self.chassis_radius * wz;
        self.speeds = [vy + rotation, -vy + rotation, -vx + rotation, vx + rotation];
        self.targets()
    }

    fn targets(&self) -> WheelTargets {
        WheelTargets {
            speeds: self.speeds,
            angles: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(QuadOmniChassis::new(0.0).is_err());
        assert!(QuadOmniChassis::new(f32::NAN).is_err());
    }

    #[test]
    fn test_pure_forward() {
        let mut chassis = QuadOmniChassis::new(0.25).unwrap();
        // Front and back wheels roll sideways, left and right oppose
        assert_eq!(chassis.forward(1.0, 0.0, 0.0).speeds, [0.0, 0.0, -1.0, 1.0]);
    }

    #[test]
    fn test_pure_rotation() {
        let mut chassis = QuadOmniChassis::new(0.25).unwrap();
        assert_eq!(chassis.forward(0.0, 0.0, 2.0).speeds, [0.5; 4]);
    }

    #[test]
    fn test_inverse_of_known_speeds() {
        let chassis = QuadOmniChassis::new(0.5).unwrap();
        let body = chassis.inverse(1.0, -1.0, 0.0, 0.0);
        assert_eq!(body, BodyVelocity::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_inverse_recovers_random_velocities() {
        let mut rng = StdRng::seed_from_u64(0x0D0E);
        for _ in 0..200 {
            let radius = rng.random_range(0.05f32..1.0);
            let mut chassis = QuadOmniChassis::new(radius).unwrap();
            let vx = rng.random_range(-5.0f32..5.0);
            let vy = rng.random_range(-5.0f32..5.0);
            let wz = rng.random_range(-10.0f32..10.0);

            let [front, back, left, right] = chassis.forward(vx, vy, wz).speeds;
            let body = chassis.inverse(front, back, left, right);

            let tol = 1e-4 * (1.0 + vx.abs() + vy.abs() + wz.abs());
            assert!((body.vx - vx).abs() < tol, "vx {} vs {}", body.vx, vx);
            assert!((body.vy - vy).abs() < tol, "vy {} vs {}", body.vy, vy);
            assert!((body.wz - wz).abs() < tol, "wz {} vs {}", body.wz, wz);
        }
    }
}
