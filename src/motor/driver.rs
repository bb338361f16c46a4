// High-level motor set for the chassis
//
// Groups the drive motors (and steer motors for a steering chassis) the
// runtime commands each tick.

use std::f32::consts::TAU;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::bus::{ConstructionError, DjiMotor, MotorBus};
use super::dji::{MotorFamily, ENCODER_RESOLUTION};
use crate::can::TransportError;
use crate::kinematics::wrap_angle;
use crate::messages::{MotorCommand, MotorStates};

/// Drive and steer motors of one chassis
pub struct MotorSet {
    drive: Vec<DjiMotor>,
    steer: Vec<DjiMotor>,
    /// Encoder reading of each steer motor when its wheel points forward
    steer_offsets: Vec<u16>,
}

impl MotorSet {
    /// Attach drive motors with ids `1..=drive_count`
    pub fn new(
        bus: &Arc<MotorBus>,
        family: MotorFamily,
        drive_count: u8,
    ) -> Result<Self, ConstructionError> {
        let drive = (1..=drive_count)
            .map(|id| DjiMotor::new(bus, family, id))
            .collect::<Result<Vec<_>, _>>()?;
        info!("Attached {} {:?} drive motors", drive.len(), family);
        Ok(Self {
            drive,
            steer: Vec::new(),
            steer_offsets: Vec::new(),
        })
    }

    /// Also attach steer motors with ids `1..=offsets.len()`
    pub fn with_steering(
        mut self,
        bus: &Arc<MotorBus>,
        family: MotorFamily,
        offsets: Vec<u16>,
    ) -> Result<Self, ConstructionError> {
        self.steer = (1..=offsets.len() as u8)
            .map(|id| DjiMotor::new(bus, family, id))
            .collect::<Result<Vec<_>, _>>()?;
        info!("Attached {} {:?} steer motors", self.steer.len(), family);
        self.steer_offsets = offsets;
        Ok(self)
    }

    pub fn drive(&self) -> &[DjiMotor] {
        &self.drive
    }

    pub fn steer(&self) -> &[DjiMotor] {
        &self.steer
    }

    /// Write every command in `cmd`; extra values are ignored, missing ones
    /// leave the slot as it was. Returns the first transport error after
    /// attempting all motors.
    pub fn apply(&self, cmd: &MotorCommand) -> Result<(), TransportError> {
        let mut first_err = None;
        let pairs = self
            .drive
            .iter()
            .zip(&cmd.drive)
            .chain(self.steer.iter().zip(&cmd.steer));

        for (motor, &value) in pairs {
            if let Err(e) = motor.set_command(value) {
                debug!("{:?} id {} send failed: {}", motor.family(), motor.id(), e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Zero every motor output
    pub fn stop(&self) -> Result<(), TransportError> {
        let zero = MotorCommand {
            drive: vec![0; self.drive.len()],
            steer: vec![0; self.steer.len()],
        };
        self.apply(&zero)
    }

    /// Latest feedback of every motor
    pub fn states(&self) -> MotorStates {
        MotorStates {
            drive: self.drive.iter().map(DjiMotor::feedback).collect(),
            steer: self.steer.iter().map(DjiMotor::feedback).collect(),
        }
    }

    /// Current wheel angle of each steering module, radians in [-π, π).
    /// `None` until every steer motor has reported.
    pub fn steer_angles(&self) -> Option<Vec<f32>> {
        self.steer
            .iter()
            .zip(&self.steer_offsets)
            .map(|(motor, &offset)| {
                let fb = motor.feedback()?;
                Some(encoder_to_angle(fb.encoder, offset))
            })
            .collect()
    }
}

impl Drop for MotorSet {
    fn drop(&mut self) {
        // Leave the chassis unpowered when the runtime goes away
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}

/// Encoder reading relative to `offset`, as an angle in [-π, π)
pub fn encoder_to_angle(encoder: u16, offset: u16) -> f32 {
    let counts = encoder as i32 - offset as i32;
    wrap_angle(counts as f32 / ENCODER_RESOLUTION as f32 * TAU)
}
