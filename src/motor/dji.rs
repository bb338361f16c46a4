// DJI RoboMaster motor CAN protocol
//
// Feedback frame (motor -> host), STD, DLC=8, big-endian:
//   [encoder(2), rpm(2), current(2), temperature(1), reserved(1)]
// Control frame (host -> motors), STD, DLC=8, big-endian:
//   four signed 16-bit command slots, one per motor id within the group

use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::can::MAX_DLC;

/// Encoder counts per mechanical revolution
pub const ENCODER_RESOLUTION: u16 = 8192;

/// Motors per control frame
pub const GROUP_SIZE: usize = 4;

/// Supported motor/ESC families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MotorFamily {
    /// GM6020 gimbal motor, voltage command
    Gm6020,
    /// M3508 motor with C620 ESC, current command
    M3508,
    /// M2006 motor with C610 ESC, current command
    M2006,
}

impl MotorFamily {
    /// Feedback frames arrive on `feedback_base() + id`
    pub const fn feedback_base(self) -> u16 {
        match self {
            MotorFamily::Gm6020 => 0x204,
            MotorFamily::M3508 | MotorFamily::M2006 => 0x200,
        }
    }

    /// Control IDs, first for ids 1-4, second for ids 5-8
    pub const fn control_ids(self) -> [u16; 2] {
        match self {
            MotorFamily::Gm6020 => [0x1FF, 0x2FF],
            MotorFamily::M3508 | MotorFamily::M2006 => [0x200, 0x1FF],
        }
    }

    /// Highest settable motor id
    pub const fn max_id(self) -> u8 {
        match self {
            MotorFamily::Gm6020 => 7,
            MotorFamily::M3508 | MotorFamily::M2006 => 8,
        }
    }

    /// Largest command magnitude the ESC accepts
    pub const fn command_limit(self) -> i16 {
        match self {
            MotorFamily::Gm6020 => 30000, // voltage
            MotorFamily::M3508 => 16384,  // -20A ~ 20A
            MotorFamily::M2006 => 10000,  // -10A ~ 10A
        }
    }

    pub fn feedback_id(self, id: u8) -> u16 {
        self.feedback_base() + id as u16
    }

    /// Control frame ID and slot index carrying motor `id`'s command
    pub fn control_slot(self, id: u8) -> (u16, usize) {
        let index = (id as usize).saturating_sub(1);
        (self.control_ids()[index / GROUP_SIZE], index % GROUP_SIZE)
    }

    /// Clamp a command into the family range
    pub fn clamp_command(self, value: i16) -> i16 {
        let limit = self.command_limit();
        value.clamp(-limit, limit)
    }
}

/// Error types for decoding motor frames
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame 0x{can_id:03X}: expected 8 data bytes, got {len}")]
    MalformedFrame { can_id: u16, len: usize },
}

/// One feedback snapshot reported by a motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Feedback {
    /// Rotor position, 0..8191 per revolution
    pub encoder: u16,
    pub rpm: i16,
    /// Measured torque current (raw ESC units)
    pub current: i16,
    /// Degrees Celsius
    pub temperature: u8,
}

impl Feedback {
    /// Decode a feedback payload
    pub fn decode(can_id: u16, data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() != MAX_DLC {
            return Err(ProtocolError::MalformedFrame {
                can_id,
                len: data.len(),
            });
        }
        Ok(Self {
            encoder: u16::from_be_bytes([data[0], data[1]]),
            rpm: i16::from_be_bytes([data[2], data[3]]),
            current: i16::from_be_bytes([data[4], data[5]]),
            temperature: data[6],
        })
    }

    /// Encode as the motor would put it on the wire
    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0..2].copy_from_slice(&self.encoder.to_be_bytes());
        out[2..4].copy_from_slice(&self.rpm.to_be_bytes());
        out[4..6].copy_from_slice(&self.current.to_be_bytes());
        out[6] = self.temperature;
        out
    }

    /// Rotor angle in radians, [0, 2π)
    pub fn angle(&self) -> f32 {
        (self.encoder % ENCODER_RESOLUTION) as f32 / ENCODER_RESOLUTION as f32 * TAU
    }
}

const VALID_BIT: u64 = 1 << 63;

/// Lock-free feedback slot shared between the frame listener and readers.
///
/// The whole snapshot lives in one `AtomicU64` so readers never observe a
/// half-updated frame.
#[derive(Debug, Default)]
pub struct FeedbackCell(AtomicU64);

impl FeedbackCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, feedback: Feedback) {
        let packed = VALID_BIT
            | feedback.encoder as u64
            | (feedback.rpm as u16 as u64) << 16
            | (feedback.current as u16 as u64) << 32
            | (feedback.temperature as u64) << 48;
        self.0.store(packed, Ordering::Release);
    }

    /// `None` until the first feedback frame has been stored
    pub fn load(&self) -> Option<Feedback> {
        let packed = self.0.load(Ordering::Acquire);
        if packed & VALID_BIT == 0 {
            return None;
        }
        Some(Feedback {
            encoder: packed as u16,
            rpm: (packed >> 16) as u16 as i16,
            current: (packed >> 32) as u16 as i16,
            temperature: (packed >> 48) as u8,
        })
    }
}
