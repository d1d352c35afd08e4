use log::{debug, info};

use crate::objects::{ObjectKind, ReportIdMap, NO_MESSAGE_REPORT_ID};

pub const MESSAGE_SIZE: usize = 9;
pub const PAYLOAD_SIZE: usize = MESSAGE_SIZE - 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Message {
    pub report_id: u8,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Message {
    pub fn from_bytes(raw: [u8; MESSAGE_SIZE]) -> Self {
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&raw[1..]);
        Self {
            report_id: raw[0],
            payload,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.report_id == NO_MESSAGE_REPORT_ID
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndReason {
    /// `0xFF`: the device has nothing queued.
    Empty,
    /// ID 0 is never assigned.
    Reserved,
    /// Above the highest ID the object table assigns.
    OutOfRange(u8),
}

/// Handler selected for one message. `index` is the report index inside the
/// object (the contact slot for touch objects).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route {
    End(EndReason),
    Command,
    Touch { index: u8 },
    TouchV2 { index: u8 },
    Key { index: u8 },
    AreaMetrics,
    Timer { index: u8 },
    SelfTest,
    Palm,
    NoiseSuppression,
    Unhandled(ObjectKind),
}

pub fn route(map: &ReportIdMap, message: &Message) -> Route {
    let report_id = message.report_id;
    if report_id == 0 {
        debug!("mxt: reserved report id 0");
        return Route::End(EndReason::Reserved);
    }
    if message.is_empty() {
        return Route::End(EndReason::Empty);
    }
    if report_id > map.max_report_id() {
        info!(
            "mxt: report id {} beyond max {}, ending pass",
            report_id,
            map.max_report_id()
        );
        return Route::End(EndReason::OutOfRange(report_id));
    }

    let Some(target) = map.target(report_id) else {
        return Route::End(EndReason::OutOfRange(report_id));
    };
    let index = target.index;
    match target.kind {
        ObjectKind::CommandProcessor => Route::Command,
        ObjectKind::MultiTouchScreen => Route::Touch { index },
        ObjectKind::MultiTouchScreenV2 => Route::TouchV2 { index },
        ObjectKind::KeyArray => Route::Key { index },
        ObjectKind::ExtraTouchData => Route::AreaMetrics,
        ObjectKind::Timer => Route::Timer { index },
        ObjectKind::SelfTest => Route::SelfTest,
        ObjectKind::TouchSuppression => Route::Palm,
        ObjectKind::NoiseSuppression => Route::NoiseSuppression,
        other => {
            info!(
                "mxt: unhandled {} message rid={} {:02x?}",
                other, report_id, message.payload
            );
            Route::Unhandled(other)
        }
    }
}
