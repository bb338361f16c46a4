// SocketCAN backend (Linux only)

use std::io;
use std::time::Duration;

use socketcan::{CanFrame as SocketFrame, CanSocket, EmbeddedFrame, Id, Socket, StandardId};
use tracing::{debug, info};

use super::{check_outbound, CanFrame, CanTransport, Result, TransportError};

/// Returned by the kernel when the interface TX queue is full
const ENOBUFS: i32 = 105;

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// CAN interface opened through the kernel SocketCAN stack (e.g. `can0`)
pub struct SocketCanTransport {
    socket: CanSocket,
    interface: String,
}

impl SocketCanTransport {
    /// Open a raw CAN socket bound to `interface`
    pub fn open(interface: &str) -> Result<Self> {
        info!("Opening SocketCAN interface {}", interface);
        let socket = CanSocket::open(interface)?;
        Ok(Self {
            socket,
            interface: interface.to_string(),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl CanTransport for SocketCanTransport {
    fn send(&self, frame: &CanFrame) -> Result<()> {
        check_outbound(frame)?;
        let id = StandardId::new(frame.id).ok_or_else(|| TransportError::InvalidFrame {
            id: frame.id,
            reason: "not an 11-bit identifier".to_string(),
        })?;
        let raw = SocketFrame::new(id, &frame.data).ok_or_else(|| TransportError::InvalidFrame {
            id: frame.id,
            reason: "payload rejected by socketcan".to_string(),
        })?;

        match self.socket.write_frame(&raw) {
            Ok(()) => Ok(()),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(ENOBUFS) =>
            {
                Err(TransportError::Busy)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>> {
        self.socket.set_read_timeout(timeout)?;
        let raw = match self.socket.read_frame() {
            Ok(raw) => raw,
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) => return Err(TransportError::Io(e)),
        };

        // Only standard data frames carry motor feedback
        match raw {
            SocketFrame::Data(data_frame) => match data_frame.id() {
                Id::Standard(id) => Ok(Some(CanFrame::new(id.as_raw(), data_frame.data()))),
                Id::Extended(id) => {
                    debug!("Skipping extended frame 0x{:08X}", id.as_raw());
                    Ok(None)
                }
            },
            _ => Ok(None),
        }
    }
}
