// CAN transport layer
//
// Provides:
// - A standard-ID data frame type
// - The `CanTransport` trait the motor bus sends and receives through
// - SocketCAN (Linux), SLCAN serial adapter and in-memory mock backends

mod mock;
pub mod slcan;
#[cfg(target_os = "linux")]
mod socket;

use std::time::Duration;

pub use mock::MockTransport;
pub use slcan::SlcanTransport;
#[cfg(target_os = "linux")]
pub use socket::SocketCanTransport;

/// Largest payload of a classic CAN data frame
pub const MAX_DLC: usize = 8;

/// Highest 11-bit standard identifier
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// A classic CAN 2.0A data frame (11-bit ID, 0..=8 data bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u16,
    pub data: Vec<u8>,
}

impl CanFrame {
    pub fn new(id: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }
}

/// Error types for the transport backends
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("CAN transmit queue is full")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Invalid frame 0x{id:03X}: {reason}")]
    InvalidFrame { id: u16, reason: String },

    #[error("CAN transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A CAN bus the motor layer can talk through.
///
/// Implementations must be shareable between the control loop (sending) and
/// the feedback listener thread (receiving), so both methods take `&self`.
pub trait CanTransport: Send + Sync {
    /// Queue a frame for transmission without blocking.
    fn send(&self, frame: &CanFrame) -> Result<()>;

    /// Wait up to `timeout` for the next standard data frame.
    /// Returns `Ok(None)` when nothing arrived in time.
    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>>;
}

fn check_outbound(frame: &CanFrame) -> Result<()> {
    if frame.id > MAX_STANDARD_ID {
        return Err(TransportError::InvalidFrame {
            id: frame.id,
            reason: "not an 11-bit identifier".to_string(),
        });
    }
    if frame.data.len() > MAX_DLC {
        return Err(TransportError::InvalidFrame {
            id: frame.id,
            reason: format!("{} data bytes", frame.data.len()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_outbound_rejects_extended_id() {
        let frame = CanFrame::new(0x800, [0u8; 8]);
        assert!(matches!(
            check_outbound(&frame),
            Err(TransportError::InvalidFrame { id: 0x800, .. })
        ));
    }

    #[test]
    fn test_check_outbound_rejects_long_payload() {
        let frame = CanFrame::new(0x200, vec![0u8; 9]);
        assert!(check_outbound(&frame).is_err());
        assert!(check_outbound(&CanFrame::new(0x200, [0u8; 8])).is_ok());
    }
}
