use log::{debug, info, warn};

use super::{ContactEvent, ContactKind, ContactReport};
use crate::{config::TrackerConfig, router::PAYLOAD_SIZE};

const T9_DETECT: u8 = 0x80;
const T9_PRESS: u8 = 0x40;
const T9_RELEASE: u8 = 0x20;
const T9_MOVE: u8 = 0x10;
const T9_VECTOR: u8 = 0x08;
const T9_AMPLITUDE: u8 = 0x04;
const T9_SUPPRESS: u8 = 0x02;

const T100_SCREEN_REPORTS: u8 = 2;
const T100_DETECT: u8 = 0x80;
const T100_EVENT_NONE: u8 = 0;
const T100_EVENT_MOVE: u8 = 1;
const T100_EVENT_UNSUPPRESS: u8 = 2;
const T100_EVENT_SUPPRESS: u8 = 3;
const T100_EVENT_DOWN: u8 = 4;
const T100_EVENT_UP: u8 = 5;

const T15_DETECT: u8 = 0x80;

/// Legacy multitouch (T9) message.
pub fn decode_legacy(
    slot: u8,
    payload: &[u8; PAYLOAD_SIZE],
    config: &TrackerConfig,
) -> Option<ContactReport> {
    let status = payload[0];
    let mut x = (u16::from(payload[1]) << 4) | (u16::from(payload[3]) >> 4);
    let mut y = (u16::from(payload[2]) << 4) | (u16::from(payload[3]) & 0x0F);
    if config.max_x < config.coordinate_shift_threshold {
        x >>= config.coordinate_shift;
    }
    if config.max_y < config.coordinate_shift_threshold {
        y >>= config.coordinate_shift;
    }

    let report = |detect, event, pressure| ContactReport {
        slot,
        detect,
        kind: ContactKind::Finger,
        event,
        x,
        y,
        width: payload[4],
        pressure,
    };

    if status & T9_RELEASE != 0 {
        return Some(report(false, ContactEvent::Release, 0));
    }
    if status & T9_DETECT != 0 && status & (T9_PRESS | T9_MOVE) != 0 {
        let event = if status & T9_PRESS != 0 {
            ContactEvent::Press
        } else {
            ContactEvent::Move
        };
        return Some(report(true, event, payload[5]));
    }
    if status & T9_SUPPRESS != 0 {
        return Some(report(false, ContactEvent::Suppress, 0));
    }
    if status & T9_DETECT == 0 || status & (T9_AMPLITUDE | T9_VECTOR) == 0 {
        warn!("mxt: T9 slot {} unknown status {:#04x}", slot, status);
    }
    None
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum V2Message {
    Screen { index: u8, status: u8 },
    Contact(ContactReport),
    Ignored,
}

/// Multi-field multitouch (T100) message. The first two report indices
/// carry screen status; contacts follow.
pub fn decode_v2(index: u8, payload: &[u8; PAYLOAD_SIZE]) -> V2Message {
    if index < T100_SCREEN_REPORTS {
        if index == 0 {
            info!(
                "mxt: T100 screen status {:#04x} touches={}",
                payload[0], payload[1]
            );
        }
        return V2Message::Screen {
            index,
            status: payload[0],
        };
    }

    let slot = index - T100_SCREEN_REPORTS;
    let detect = payload[0] & T100_DETECT != 0;
    let event = payload[0] & 0x0F;
    let kind = match (payload[0] >> 4) & 0x07 {
        1 => ContactKind::Finger,
        2 => ContactKind::PassiveStylus,
        3 => ContactKind::ActiveStylus,
        4 => ContactKind::HoveringFinger,
        other => ContactKind::Unknown(other),
    };

    match kind {
        ContactKind::ActiveStylus => return V2Message::Ignored,
        ContactKind::Unknown(raw) => {
            debug!("mxt: T100 slot {} unknown contact type {}", slot, raw);
            return V2Message::Ignored;
        }
        _ => {}
    }

    let event = match (detect, event) {
        (true, T100_EVENT_DOWN | T100_EVENT_UNSUPPRESS) => ContactEvent::Press,
        (true, T100_EVENT_MOVE | T100_EVENT_NONE) => ContactEvent::Move,
        (false, T100_EVENT_UP) => ContactEvent::Release,
        (false, T100_EVENT_SUPPRESS) => ContactEvent::Suppress,
        (detect, other) => {
            warn!(
                "mxt: T100 slot {} untreated event {} detect={}",
                slot, other, detect
            );
            return V2Message::Ignored;
        }
    };

    let (width, pressure) = if !detect || kind == ContactKind::HoveringFinger {
        (0, 0)
    } else {
        (payload[7], payload[6])
    };

    V2Message::Contact(ContactReport {
        slot,
        detect,
        kind,
        event,
        x: u16::from_le_bytes([payload[1], payload[2]]),
        y: u16::from_le_bytes([payload[3], payload[4]]),
        width,
        pressure,
    })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyReport {
    pub detect: bool,
    pub state: u8,
}

impl KeyReport {
    /// Lowest key whose bit is set while the array reports a touch.
    pub fn pressed_key(&self) -> Option<u8> {
        if self.detect && self.state != 0 {
            Some(self.state.trailing_zeros() as u8)
        } else {
            None
        }
    }
}

/// Key array (T15) message.
pub fn decode_key(payload: &[u8; PAYLOAD_SIZE]) -> KeyReport {
    KeyReport {
        detect: payload[0] & T15_DETECT != 0,
        state: payload[1],
    }
}
