use heapless::Vec;
use log::{debug, warn};

use crate::config::TrackerConfig;

mod decode;

pub use decode::{decode_key, decode_legacy, decode_v2, KeyReport, V2Message};

pub const MAX_CONTACTS: usize = 10;
/// Every slot plus one lift per slot that was pressed again in the same pass.
pub const MAX_BATCH: usize = MAX_CONTACTS * 2;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ContactPhase {
    #[default]
    Inactive,
    Pressed,
    Moving,
    Released,
}

impl ContactPhase {
    pub const fn is_down(self) -> bool {
        matches!(self, Self::Pressed | Self::Moving)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ContactKind {
    #[default]
    Finger,
    PassiveStylus,
    ActiveStylus,
    HoveringFinger,
    Unknown(u8),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContactEvent {
    Press,
    Move,
    Release,
    Suppress,
}

/// One decoded contact update, independent of the wire format it came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContactReport {
    pub slot: u8,
    pub detect: bool,
    pub kind: ContactKind,
    pub event: ContactEvent,
    pub x: u16,
    pub y: u16,
    pub width: u8,
    pub pressure: u8,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ContactSlot {
    pub phase: ContactPhase,
    pub x: u16,
    pub y: u16,
    pub width: u8,
    pub pressure: u8,
    pub move_count: u16,
    pub kind: ContactKind,
    pub last_event: Option<ContactEvent>,
}

/// Snapshot of one slot as reported in a batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContactState {
    pub slot: u8,
    pub phase: ContactPhase,
    pub kind: ContactKind,
    pub x: u16,
    pub y: u16,
    pub width: u8,
    pub pressure: u8,
    pub move_count: u16,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContactBatch {
    pub contacts: Vec<ContactState, MAX_BATCH>,
    pub any_active: bool,
}

impl ContactBatch {
    pub fn released(&self) -> impl Iterator<Item = &ContactState> {
        self.contacts
            .iter()
            .filter(|contact| contact.phase == ContactPhase::Released)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObservationKind {
    Press,
    Move,
    Release,
}

/// Read-only view of a slot transition handed to the calibration engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContactObservation {
    pub slot: u8,
    pub kind: ObservationKind,
    pub x: u16,
    pub y: u16,
    pub width: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyTransition {
    pub key: u8,
    pub pressed: bool,
}

pub type KeyTransitions = Vec<KeyTransition, 2>;

pub struct ContactTracker {
    config: TrackerConfig,
    slots: [ContactSlot; MAX_CONTACTS],
    /// Releases overtaken by a new press before the flush.
    lifted: Vec<ContactState, MAX_CONTACTS>,
    dirty: bool,
    reported_active: bool,
    pressed_key: Option<u8>,
}

impl ContactTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            slots: [ContactSlot::default(); MAX_CONTACTS],
            lifted: Vec::new(),
            dirty: false,
            reported_active: false,
            pressed_key: None,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn slot_limit(&self) -> usize {
        usize::from(self.config.max_slots).min(MAX_CONTACTS)
    }

    pub fn slot(&self, slot: u8) -> Option<&ContactSlot> {
        self.slots[..self.slot_limit()].get(usize::from(slot))
    }

    pub fn slots(&self) -> &[ContactSlot] {
        &self.slots[..self.slot_limit()]
    }

    /// Slots currently pressed or moving.
    pub fn active_count(&self) -> u8 {
        self.slots
            .iter()
            .filter(|slot| slot.phase.is_down())
            .count() as u8
    }

    pub fn has_pending(&self) -> bool {
        self.dirty || (self.reported_active && self.active_count() == 0)
    }

    pub fn apply(&mut self, report: ContactReport) -> Option<ContactObservation> {
        let index = usize::from(report.slot);
        if index >= self.slot_limit() {
            warn!(
                "mxt: contact slot {} out of range (max {})",
                report.slot,
                self.slot_limit()
            );
            return None;
        }

        let slot = &mut self.slots[index];
        let repress = matches!(report.event, ContactEvent::Press | ContactEvent::Move);
        if repress && slot.phase == ContactPhase::Released {
            debug!("mxt: slot {} pressed again before flush", report.slot);
            let _ = self.lifted.push(Self::snapshot(report.slot, slot));
        }
        let kind = match (report.event, slot.phase) {
            (ContactEvent::Press, _) => {
                Self::press(slot, &report);
                ObservationKind::Press
            }
            (ContactEvent::Move, ContactPhase::Inactive | ContactPhase::Released) => {
                debug!("mxt: slot {} moved without press, promoting", report.slot);
                Self::press(slot, &report);
                ObservationKind::Press
            }
            (ContactEvent::Move, _) => {
                slot.phase = ContactPhase::Moving;
                slot.x = report.x;
                slot.y = report.y;
                slot.width = report.width;
                slot.pressure = report.pressure;
                slot.move_count = slot.move_count.saturating_add(1);
                ObservationKind::Move
            }
            (ContactEvent::Release | ContactEvent::Suppress, ContactPhase::Inactive) => {
                debug!("mxt: release for idle slot {} ignored", report.slot);
                return None;
            }
            (ContactEvent::Release | ContactEvent::Suppress, _) => {
                slot.phase = ContactPhase::Released;
                slot.width = report.width;
                slot.pressure = 0;
                ObservationKind::Release
            }
        };
        slot.last_event = Some(report.event);
        let observation = ContactObservation {
            slot: report.slot,
            kind,
            x: slot.x,
            y: slot.y,
            width: slot.width,
        };
        self.dirty = true;
        Some(observation)
    }

    fn press(slot: &mut ContactSlot, report: &ContactReport) {
        slot.phase = ContactPhase::Pressed;
        slot.kind = report.kind;
        slot.x = report.x;
        slot.y = report.y;
        slot.width = report.width;
        slot.pressure = report.pressure;
        slot.move_count = 0;
    }

    /// Emits one batch covering every non-idle slot, then advances Released
    /// slots to Inactive and Pressed slots to Moving. Releases overtaken by a
    /// new press come first so the lift is never lost.
    pub fn flush(&mut self) -> Option<ContactBatch> {
        if !self.has_pending() {
            return None;
        }

        let mut batch = ContactBatch::default();
        for lift in &self.lifted {
            let _ = batch.contacts.push(*lift);
        }
        self.lifted.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.phase == ContactPhase::Inactive {
                continue;
            }
            let _ = batch.contacts.push(Self::snapshot(index as u8, slot));
            match slot.phase {
                ContactPhase::Released => *slot = ContactSlot::default(),
                ContactPhase::Pressed => slot.phase = ContactPhase::Moving,
                _ => {}
            }
        }
        batch.any_active = batch.contacts.iter().any(|contact| contact.phase.is_down());

        self.dirty = false;
        self.reported_active = batch.any_active;
        Some(batch)
    }

    fn snapshot(slot: u8, state: &ContactSlot) -> ContactState {
        ContactState {
            slot,
            phase: state.phase,
            kind: state.kind,
            x: state.x,
            y: state.y,
            width: state.width,
            pressure: state.pressure,
            move_count: state.move_count,
        }
    }

    /// Marks every down slot released for power-down. Returns how many were
    /// down.
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for slot in &mut self.slots {
            if slot.phase.is_down() {
                slot.phase = ContactPhase::Released;
                slot.pressure = 0;
                slot.last_event = Some(ContactEvent::Release);
                released += 1;
            }
        }
        if released > 0 {
            self.dirty = true;
        }
        released
    }

    pub fn apply_key(&mut self, report: KeyReport) -> KeyTransitions {
        let mut transitions = KeyTransitions::new();
        match (report.pressed_key(), self.pressed_key) {
            (Some(key), Some(previous)) if key == previous => {}
            (Some(key), previous) => {
                if let Some(previous) = previous {
                    let _ = transitions.push(KeyTransition {
                        key: previous,
                        pressed: false,
                    });
                }
                let _ = transitions.push(KeyTransition { key, pressed: true });
                self.pressed_key = Some(key);
            }
            (None, Some(previous)) => {
                let _ = transitions.push(KeyTransition {
                    key: previous,
                    pressed: false,
                });
                self.pressed_key = None;
            }
            (None, None) => {}
        }
        transitions
    }

    pub fn release_key(&mut self) -> Option<KeyTransition> {
        self.pressed_key.take().map(|key| KeyTransition {
            key,
            pressed: false,
        })
    }

    pub fn reset(&mut self) {
        self.slots = [ContactSlot::default(); MAX_CONTACTS];
        self.lifted.clear();
        self.dirty = false;
        self.reported_active = false;
        self.pressed_key = None;
    }
}
