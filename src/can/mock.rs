// In-memory CAN bus for tests and hardware-less simulation

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use super::{check_outbound, CanFrame, CanTransport, Result, TransportError};

/// Mock transport: records every sent frame and replays injected frames
/// to `recv` in FIFO order.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<CanFrame>>,
    inbound: Mutex<VecDeque<CanFrame>>,
    arrived: Condvar,
    busy: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame as if it had arrived from the bus
    pub fn inject(&self, frame: CanFrame) {
        self.inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(frame);
        self.arrived.notify_one();
    }

    /// Make every following `send` fail with `TransportError::Busy`
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// Copies of all frames passed to `send`
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The most recently sent frame, if any
    pub fn last_sent(&self) -> Option<CanFrame> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    /// The most recently sent frame with the given ID
    pub fn last_sent_to(&self, id: u16) -> Option<CanFrame> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|f| f.id == id)
            .cloned()
    }
}

impl CanTransport for MockTransport {
    fn send(&self, frame: &CanFrame) -> Result<()> {
        check_outbound(frame)?;
        if self.busy.load(Ordering::SeqCst) {
            return Err(TransportError::Busy);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(frame.clone());
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<CanFrame>> {
        let queue = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
        let (mut queue, _) = self
            .arrived
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        Ok(queue.pop_front())
    }
}
