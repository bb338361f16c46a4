// SLCAN (Lawicel ASCII) backend for USB-serial CAN adapters
//
// Line format: [t, ID (3 hex), DLC (1 hex), DATA (2 hex per byte), \r]
// Adapters answer commands with \r (ok) or \x07 (error) and acknowledge
// transmitted frames with "z\r".

use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{check_outbound, CanFrame, CanTransport, Result, TransportError, MAX_DLC};

/// Default serial configuration for SLCAN adapters
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 10;

/// Line terminators
const CR: u8 = b'\r';
const BELL: u8 = 0x07;

/// Open sequence: close (if left open), 1 Mbit/s, open channel
const OPEN_SEQUENCE: [&str; 3] = ["C\r", "S8\r", "O\r"];

/// Unterminated input kept while waiting for a line end. The longest valid
/// line is 21 bytes ("t" + id + dlc + 16 hex digits + CR).
const MAX_PENDING: usize = 64;

fn is_terminator(byte: u8) -> bool {
    byte == CR || byte == BELL
}

/// Splits the adapter's byte stream into lines
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append received bytes. An unterminated tail longer than
    /// `MAX_PENDING` is noise (usually a baud rate mismatch) and is dropped.
    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let tail_start = self
            .pending
            .iter()
            .rposition(|&b| is_terminator(b))
            .map_or(0, |i| i + 1);
        let tail = self.pending.len() - tail_start;
        if tail > MAX_PENDING {
            warn!(
                "Discarding {} unterminated SLCAN bytes, check the adapter baud rate",
                tail
            );
            self.pending.truncate(tail_start);
        }
    }

    /// Next complete line, terminator stripped
    fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| is_terminator(b))?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line[..end]).into_owned())
    }
}

struct Reader {
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
}

/// CAN bus reached through an SLCAN serial adapter
pub struct SlcanTransport {
    writer: Mutex<Box<dyn SerialPort>>,
    reader: Mutex<Reader>,
}

impl SlcanTransport {
    /// Open the adapter and bring the CAN channel up at 1 Mbit/s
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom serial baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        info!("Opening SLCAN adapter on {}", port_name);
        let mut port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        for cmd in OPEN_SEQUENCE {
            port.write_all(cmd.as_bytes())?;
        }
        port.flush()?;

        let reader = port.try_clone()?;
        Ok(Self {
            writer: Mutex::new(port),
            reader: Mutex::new(Reader {
                port: reader,
                lines: LineBuffer::default(),
            }),
        })
    }
}

impl Drop for SlcanTransport {
    fn drop(&mut self) {
        if let Ok(port) = self.writer.get_mut() {
            if let Err(e) = port.write_all(b"C\r") {
                warn!("Failed to close SLCAN channel: {}", e);
            }
        }
    }
}

impl CanTransport for SlcanTransport {
    fn send(&self, frame: &CanFrame) -> Result<()> {
        check_outbound(frame)?;
        let line = encode_frame(frame);
        let mut port = self.writer.lock().map_err(|_| TransportError::Closed)?;
        match port.write_all(line.as_bytes()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(TransportError::Busy),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>> {
        let deadline = Instant::now() + timeout;
        let mut reader = self.reader.lock().map_err(|_| TransportError::Closed)?;
        let mut chunk = [0u8; 64];

        loop {
            while let Some(line) = reader.lines.next_line() {
                match decode_line(&line) {
                    Ok(Some(frame)) => return Ok(Some(frame)),
                    Ok(None) => {}
                    Err(e) => warn!("Dropping SLCAN line {:?}: {}", line, e),
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            reader.port.set_timeout(remaining)?;
            match reader.port.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => reader.lines.extend(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }
}

/// Encode a standard data frame as an SLCAN transmit line
pub fn encode_frame(frame: &CanFrame) -> String {
    let mut line = format!("t{:03X}{:X}", frame.id, frame.data.len());
    for byte in &frame.data {
        line.push_str(&format!("{:02X}", byte));
    }
    line.push('\r');
    line
}

/// Parse one SLCAN line (terminator stripped).
///
/// Returns `Ok(None)` for anything that is not a standard data frame
/// (acks, error bells, extended or remote frames).
pub fn decode_line(line: &str) -> Result<Option<CanFrame>> {
    let Some(body) = line.strip_prefix('t') else {
        if !line.is_empty() && line != "z" && line != "Z" {
            debug!("Ignoring SLCAN line {:?}", line);
        }
        return Ok(None);
    };

    let invalid = |reason: &str| TransportError::InvalidFrame {
        id: 0,
        reason: reason.to_string(),
    };

    if body.len() < 4 || !body.is_ascii() {
        return Err(invalid("truncated header"));
    }
    let id = u16::from_str_radix(&body[..3], 16)
        .map_err(|_| invalid("bad identifier"))?;
    let dlc = usize::from_str_radix(&body[3..4], 16)
        .map_err(|_| invalid("bad length"))?;
    if dlc > MAX_DLC {
        return Err(invalid("length above 8"));
    }

    let hex = &body[4..];
    if hex.len() < dlc * 2 {
        return Err(invalid("missing data bytes"));
    }
    let mut data = Vec::with_capacity(dlc);
    for i in 0..dlc {
        let byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| invalid("bad data byte"))?;
        data.push(byte);
    }

    Ok(Some(CanFrame::new(id, data)))
}
