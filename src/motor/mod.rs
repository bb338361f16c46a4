// Motor control module for DJI RoboMaster motors
//
// Provides:
// - DJI CAN protocol: feedback decoding, control slots, command ranges
// - Shared bus handle with feedback routing and control-frame groups
// - High-level motor set used by the runtime

mod bus;
pub mod dji;
mod driver;

pub use bus::{CommandOutcome, ConstructionError, ControlGroup, DjiMotor, Listener, MotorBus};
pub use dji::{Feedback, MotorFamily, ProtocolError};
pub use driver::{encoder_to_angle, MotorSet};
