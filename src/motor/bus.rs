// Shared CAN bus handle for DJI motors
//
// Owns the control-frame groups (one 8-byte payload per control ID) and the
// feedback routing table (feedback ID -> motor snapshot). Every motor built
// on the same bus shares these, so writes are slot-scoped and serialized by
// the group mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::dji::{Feedback, FeedbackCell, MotorFamily, ProtocolError, GROUP_SIZE};
use crate::can::{CanFrame, CanTransport, TransportError};

/// How long the listener blocks in `recv` before re-checking for shutdown
const LISTEN_TIMEOUT: Duration = Duration::from_millis(20);

/// Error types for attaching a motor to the bus
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionError {
    #[error("Invalid id {id} for {family:?}: expected 1..={max}")]
    InvalidId {
        family: MotorFamily,
        id: u8,
        max: u8,
    },

    #[error("Feedback ID 0x{can_id:03X} is already routed to another motor")]
    FeedbackIdInUse { can_id: u16 },

    #[error("Slot {slot} of control frame 0x{can_id:03X} is already owned by another motor")]
    SlotInUse { can_id: u16, slot: usize },
}

#[derive(Debug, Default)]
struct GroupState {
    payload: [u8; 8],
    owned: [bool; GROUP_SIZE],
}

/// One shared control frame: a fixed CAN ID and four 2-byte command slots
#[derive(Debug)]
pub struct ControlGroup {
    can_id: u16,
    state: Mutex<GroupState>,
}

impl ControlGroup {
    fn new(can_id: u16) -> Self {
        Self {
            can_id,
            state: Mutex::new(GroupState::default()),
        }
    }

    pub fn can_id(&self) -> u16 {
        self.can_id
    }

    fn lock(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Command currently resident in `slot`
    pub fn slot_value(&self, slot: usize) -> i16 {
        let state = self.lock();
        i16::from_be_bytes([state.payload[slot * 2], state.payload[slot * 2 + 1]])
    }

    /// Current payload, as it would be transmitted
    pub fn payload(&self) -> [u8; 8] {
        self.lock().payload
    }

    /// Write one slot and transmit the whole group while still holding the
    /// lock, so concurrent writers can never interleave a torn frame.
    fn write_and_send(
        &self,
        slot: usize,
        value: i16,
        transport: &dyn CanTransport,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.payload[slot * 2..slot * 2 + 2].copy_from_slice(&value.to_be_bytes());
        transport.send(&CanFrame::new(self.can_id, state.payload))
    }
}

/// Shared bus handle motors are constructed on
pub struct MotorBus {
    transport: Arc<dyn CanTransport>,
    groups: Mutex<HashMap<u16, Arc<ControlGroup>>>,
    routes: RwLock<HashMap<u16, Arc<FeedbackCell>>>,
}

impl MotorBus {
    pub fn new(transport: Arc<dyn CanTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            groups: Mutex::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
        })
    }

    /// Control group for `can_id`, if any motor has claimed a slot in it
    pub fn group(&self, can_id: u16) -> Option<Arc<ControlGroup>> {
        self.groups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&can_id)
            .cloned()
    }

    /// Route one inbound frame to the motor listening on its ID.
    ///
    /// Returns `Ok(false)` when no motor is registered for the ID (the bus is
    /// shared with unrelated traffic). A malformed payload leaves the motor's
    /// previous snapshot untouched.
    pub fn dispatch(&self, frame: &CanFrame) -> Result<bool, ProtocolError> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        let Some(cell) = routes.get(&frame.id) else {
            return Ok(false);
        };
        let feedback = Feedback::decode(frame.id, &frame.data)?;
        cell.store(feedback);
        Ok(true)
    }

    /// Receive and dispatch frames on a background thread until the returned
    /// handle is dropped.
    pub fn spawn_listener(self: &Arc<Self>) -> std::io::Result<Listener> {
        let bus = Arc::clone(self);
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = std::thread::Builder::new()
            .name("can-listener".to_string())
            .spawn(move || {
                info!("CAN listener started");
                while flag.load(Ordering::Relaxed) {
                    match bus.transport.recv(LISTEN_TIMEOUT) {
                        Ok(Some(frame)) => {
                            if let Err(e) = bus.dispatch(&frame) {
                                warn!("Dropping frame: {}", e);
                            }
                        }
                        Ok(None) => {}
                        Err(TransportError::Closed) => {
                            warn!("CAN transport closed, listener exiting");
                            break;
                        }
                        Err(e) => {
                            warn!("CAN receive error: {}", e);
                            std::thread::sleep(LISTEN_TIMEOUT);
                        }
                    }
                }
                info!("CAN listener stopped");
            })?;

        Ok(Listener {
            running,
            handle: Some(handle),
        })
    }

    fn attach(&self, family: MotorFamily, id: u8) -> Result<Attachment, ConstructionError> {
        if id == 0 || id > family.max_id() {
            return Err(ConstructionError::InvalidId {
                family,
                id,
                max: family.max_id(),
            });
        }

        let feedback_id = family.feedback_id(id);
        let (control_id, slot) = family.control_slot(id);

        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        if routes.contains_key(&feedback_id) {
            return Err(ConstructionError::FeedbackIdInUse {
                can_id: feedback_id,
            });
        }

        let group = {
            let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            let group = groups
                .entry(control_id)
                .or_insert_with(|| Arc::new(ControlGroup::new(control_id)))
                .clone();
            let mut state = group.lock();
            if state.owned[slot] {
                return Err(ConstructionError::SlotInUse {
                    can_id: control_id,
                    slot,
                });
            }
            state.owned[slot] = true;
            drop(state);
            group
        };

        let feedback = Arc::new(FeedbackCell::new());
        routes.insert(feedback_id, Arc::clone(&feedback));
        debug!(
            "Attached {:?} id {} (feedback 0x{:03X}, control 0x{:03X} slot {})",
            family, id, feedback_id, control_id, slot
        );

        Ok(Attachment {
            feedback_id,
            group,
            slot,
            feedback,
        })
    }

    fn detach(&self, feedback_id: u16, group: &ControlGroup, slot: usize) {
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&feedback_id);

        // A released slot must not keep driving the motor through its siblings
        let mut state = group.lock();
        state.payload[slot * 2..slot * 2 + 2].copy_from_slice(&[0, 0]);
        state.owned[slot] = false;
    }
}

struct Attachment {
    feedback_id: u16,
    group: Arc<ControlGroup>,
    slot: usize,
    feedback: Arc<FeedbackCell>,
}

/// Background frame listener; stops and joins on drop
pub struct Listener {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("CAN listener thread panicked");
            }
        }
    }
}

/// Result of a command write that reached the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Sent(i16),
    /// Command exceeded the family range and was limited
    Clamped { requested: i16, applied: i16 },
}

impl CommandOutcome {
    /// Value actually written into the slot
    pub fn applied(&self) -> i16 {
        match *self {
            CommandOutcome::Sent(value) => value,
            CommandOutcome::Clamped { applied, .. } => applied,
        }
    }
}

/// One DJI motor on a shared bus
pub struct DjiMotor {
    bus: Arc<MotorBus>,
    family: MotorFamily,
    id: u8,
    feedback_id: u16,
    group: Arc<ControlGroup>,
    slot: usize,
    feedback: Arc<FeedbackCell>,
}

impl DjiMotor {
    /// Register a motor on `bus`. Its feedback ID and control slot must not
    /// already belong to another live motor.
    pub fn new(
        bus: &Arc<MotorBus>,
        family: MotorFamily,
        id: u8,
    ) -> Result<Self, ConstructionError> {
        let attachment = bus.attach(family, id)?;
        Ok(Self {
            bus: Arc::clone(bus),
            family,
            id,
            feedback_id: attachment.feedback_id,
            group: attachment.group,
            slot: attachment.slot,
            feedback: attachment.feedback,
        })
    }

    pub fn family(&self) -> MotorFamily {
        self.family
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn feedback_id(&self) -> u16 {
        self.feedback_id
    }

    pub fn control_id(&self) -> u16 {
        self.group.can_id()
    }

    /// Latest feedback, `None` until the motor has reported once
    pub fn feedback(&self) -> Option<Feedback> {
        self.feedback.load()
    }

    /// Command currently resident in this motor's slot
    pub fn last_command(&self) -> i16 {
        self.group.slot_value(self.slot)
    }

    /// Set the motor's current (voltage for GM6020) and transmit its control
    /// frame immediately, carrying the latest value of every sibling slot.
    ///
    /// Out-of-range values are clamped. Transport errors are returned as-is,
    /// the caller decides whether to retry on the next tick.
    pub fn set_command(&self, value: i16) -> Result<CommandOutcome, TransportError> {
        let applied = self.family.clamp_command(value);
        self.group
            .write_and_send(self.slot, applied, self.bus.transport.as_ref())?;

        if applied != value {
            debug!(
                "{:?} id {} command {} clamped to {}",
                self.family, self.id, value, applied
            );
            Ok(CommandOutcome::Clamped {
                requested: value,
                applied,
            })
        } else {
            Ok(CommandOutcome::Sent(value))
        }
    }
}

impl Drop for DjiMotor {
    fn drop(&mut self) {
        self.bus.detach(self.feedback_id, &self.group, self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::MockTransport;

    fn setup() -> (Arc<MockTransport>, Arc<MotorBus>) {
        let transport = Arc::new(MockTransport::new());
        let bus = MotorBus::new(transport.clone());
        (transport, bus)
    }

    fn slot(frame: &CanFrame, slot: usize) -> i16 {
        i16::from_be_bytes([frame.data[slot * 2], frame.data[slot * 2 + 1]])
    }

    #[test]
    fn test_rejects_invalid_ids() {
        let (_, bus) = setup();
        assert!(matches!(
            DjiMotor::new(&bus, MotorFamily::M3508, 0),
            Err(ConstructionError::InvalidId { id: 0, .. })
        ));
        assert!(matches!(
            DjiMotor::new(&bus, MotorFamily::M3508, 9),
            Err(ConstructionError::InvalidId { max: 8, .. })
        ));
        assert!(DjiMotor::new(&bus, MotorFamily::Gm6020, 8).is_err());
    }

    #[test]
    fn test_rejects_shared_feedback_id() {
        let (_, bus) = setup();
        // M3508 id 5 and GM6020 id 1 both report on 0x205
        let _m3508 = DjiMotor::new(&bus, MotorFamily::M3508, 5).unwrap();
        assert_eq!(
            DjiMotor::new(&bus, MotorFamily::Gm6020, 1).err(),
            Some(ConstructionError::FeedbackIdInUse { can_id: 0x205 })
        );
    }

    #[test]
    fn test_rejects_duplicate_motor() {
        let (_, bus) = setup();
        let _first = DjiMotor::new(&bus, MotorFamily::M3508, 2).unwrap();
        assert!(DjiMotor::new(&bus, MotorFamily::M2006, 2).is_err());
    }

    #[test]
    fn test_drop_releases_route_and_slot() {
        let (_, bus) = setup();
        let motor = DjiMotor::new(&bus, MotorFamily::M3508, 1).unwrap();
        drop(motor);

        let motor = DjiMotor::new(&bus, MotorFamily::M3508, 1).unwrap();
        assert_eq!(motor.control_id(), 0x200);
        assert_eq!(bus.dispatch(&CanFrame::new(0x201, [0u8; 8])), Ok(true));
    }

    #[test]
    fn test_set_command_sends_full_group() {
        let (transport, bus) = setup();
        let m1 = DjiMotor::new(&bus, MotorFamily::M3508, 1).unwrap();
        let m3 = DjiMotor::new(&bus, MotorFamily::M3508, 3).unwrap();

        m1.set_command(1000).unwrap();
        m3.set_command(-1000).unwrap();

        let sent = transport.sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].data, vec![0x03, 0xE8, 0, 0, 0, 0, 0, 0]);
        // Second frame still carries motor 1's stale value
        assert_eq!(sent[1].id, 0x200);
        assert_eq!(sent[1].data, vec![0x03, 0xE8, 0, 0, 0xFC, 0x18, 0, 0]);
    }

    #[test]
    fn test_slot_isolation() {
        let values = [1500, -2500, 9000, -1];
        for (family, control_id) in [
            (MotorFamily::Gm6020, 0x1FF),
            (MotorFamily::M3508, 0x200),
            (MotorFamily::M2006, 0x200),
        ] {
            let (transport, bus) = setup();
            let motors: Vec<DjiMotor> = (1..=4)
                .map(|id| DjiMotor::new(&bus, family, id).unwrap())
                .collect();
            for (motor, &value) in motors.iter().zip(&values) {
                motor.set_command(value).unwrap();
            }

            for k in 0..4 {
                motors[k].set_command(-values[k]).unwrap();
                let frame = transport.last_sent_to(control_id).unwrap();
                for other in 0..4 {
                    let expected = if other <= k {
                        -values[other]
                    } else {
                        values[other]
                    };
                    assert_eq!(
                        slot(&frame, other),
                        expected,
                        "{:?} slot {} after writing {}",
                        family,
                        other,
                        k
                    );
                    assert_eq!(motors[other].last_command(), expected);
                }
            }
        }
    }

    #[test]
    fn test_drop_clears_slot_value() {
        let (transport, bus) = setup();
        let m1 = DjiMotor::new(&bus, MotorFamily::M3508, 1).unwrap();
        let m2 = DjiMotor::new(&bus, MotorFamily::M3508, 2).unwrap();
        m1.set_command(5000).unwrap();
        drop(m1);

        m2.set_command(10).unwrap();
        let frame = transport.last_sent_to(0x200).unwrap();
        assert_eq!(slot(&frame, 0), 0);
        assert_eq!(slot(&frame, 1), 10);

        let m1 = DjiMotor::new(&bus, MotorFamily::M3508, 1).unwrap();
        assert_eq!(m1.last_command(), 0);
    }

    #[test]
    fn test_owned_slot_is_rejected() {
        let (_, bus) = setup();
        let _m1 = DjiMotor::new(&bus, MotorFamily::M3508, 1).unwrap();
        // Drop the route only, leaving slot 0 of 0x200 owned
        bus.routes.write().unwrap().remove(&0x201);

        assert!(matches!(
            bus.attach(MotorFamily::M2006, 1),
            Err(ConstructionError::SlotInUse {
                can_id: 0x200,
                slot: 0
            })
        ));
        // The failed attach left no route behind
        assert_eq!(bus.dispatch(&CanFrame::new(0x201, [0u8; 8])), Ok(false));
    }

    #[test]
    fn test_second_control_id() {
        let (transport, bus) = setup();
        let m6 = DjiMotor::new(&bus, MotorFamily::M2006, 6).unwrap();
        m6.set_command(500).unwrap();

        let frame = transport.last_sent().unwrap();
        assert_eq!(frame.id, 0x1FF);
        assert_eq!(slot(&frame, 1), 500);
    }

    #[test]
    fn test_families_share_control_frame() {
        let (transport, bus) = setup();
        // GM6020 id 2 and M3508 id 5 both live in 0x1FF
        let gimbal = DjiMotor::new(&bus, MotorFamily::Gm6020, 2).unwrap();
        let wheel = DjiMotor::new(&bus, MotorFamily::M3508, 5).unwrap();

        gimbal.set_command(25000).unwrap();
        wheel.set_command(-300).unwrap();

        let frame = transport.last_sent_to(0x1FF).unwrap();
        assert_eq!(slot(&frame, 0), -300);
        assert_eq!(slot(&frame, 1), 25000);
        assert!(bus.group(0x1FF).is_some());
        assert!(bus.group(0x2FF).is_none());
    }

    #[test]
    fn test_out_of_range_command_is_clamped() {
        let (transport, bus) = setup();
        let motor = DjiMotor::new(&bus, MotorFamily::M3508, 1).unwrap();

        let outcome = motor.set_command(20000).unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Clamped {
                requested: 20000,
                applied: 16384
            }
        );
        assert_eq!(outcome.applied(), 16384);
        assert_eq!(slot(&transport.last_sent().unwrap(), 0), 16384);
        assert_eq!(motor.set_command(100).unwrap(), CommandOutcome::Sent(100));
    }

    #[test]
    fn test_busy_transport_is_surfaced() {
        let (transport, bus) = setup();
        let motor = DjiMotor::new(&bus, MotorFamily::M3508, 1).unwrap();
        transport.set_busy(true);

        assert!(matches!(motor.set_command(10), Err(TransportError::Busy)));
        assert!(transport.sent_frames().is_empty());
        // The slot keeps the value so the next successful send carries it
        assert_eq!(motor.last_command(), 10);
    }

    #[test]
    fn test_dispatch_updates_matching_motor() {
        let (_, bus) = setup();
        let m1 = DjiMotor::new(&bus, MotorFamily::M3508, 1).unwrap();
        let m2 = DjiMotor::new(&bus, MotorFamily::M3508, 2).unwrap();
        assert_eq!(m1.feedback(), None);

        let fb = Feedback {
            encoder: 100,
            rpm: -50,
            current: 20,
            temperature: 30,
        };
        assert_eq!(bus.dispatch(&CanFrame::new(0x202, fb.encode())), Ok(true));

        assert_eq!(m1.feedback(), None);
        assert_eq!(m2.feedback(), Some(fb));
    }

    #[test]
    fn test_dispatch_ignores_unknown_id() {
        let (_, bus) = setup();
        let motor = DjiMotor::new(&bus, MotorFamily::M3508, 1).unwrap();
        assert_eq!(bus.dispatch(&CanFrame::new(0x7E8, [0u8; 3])), Ok(false));
        assert_eq!(bus.dispatch(&CanFrame::new(0x202, [0u8; 8])), Ok(false));
        assert_eq!(motor.feedback(), None);
    }

    #[test]
    fn test_malformed_frame_keeps_previous_state() {
        let (_, bus) = setup();
        let motor = DjiMotor::new(&bus, MotorFamily::Gm6020, 1).unwrap();
        let fb = Feedback {
            encoder: 4000,
            rpm: 12,
            current: -7,
            temperature: 40,
        };
        bus.dispatch(&CanFrame::new(0x205, fb.encode())).unwrap();

        let result = bus.dispatch(&CanFrame::new(0x205, [0xFF; 6]));
        assert_eq!(
            result,
            Err(ProtocolError::MalformedFrame {
                can_id: 0x205,
                len: 6,
            })
        );
        assert_eq!(motor.feedback(), Some(fb));
    }

    #[test]
    fn test_listener_dispatches_injected_frames() {
        let (transport, bus) = setup();
        let motor = DjiMotor::new(&bus, MotorFamily::M3508, 4).unwrap();
        let listener = bus.spawn_listener().unwrap();

        let fb = Feedback {
            encoder: 8000,
            rpm: 900,
            current: 1000,
            temperature: 25,
        };
        transport.inject(CanFrame::new(0x100, [0u8; 8]));
        transport.inject(CanFrame::new(0x204, fb.encode()));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while motor.feedback().is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        drop(listener);
        assert_eq!(motor.feedback(), Some(fb));
    }
}
