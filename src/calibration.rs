//! Anti-touch calibration heuristics.
//!
//! The engine watches the touch/anti-touch area reports (T57) and contact
//! movement after every device calibration. A bad calibration usually shows
//! up as anti-touch area without touch area, or as a stationary "contact"
//! that never moves; either way the engine asks for a new calibration.
//! After a touch is seen the engine runs a short sequence of timed windows
//! (first, confirmation, final) before it trusts the calibration.

use statig::blocking::IntoStateMachineExt as _;

use crate::config::{active_config, CalibrationConfig};
use crate::router::PAYLOAD_SIZE;
use crate::tracker::ContactObservation;

mod hsm;
mod movement;
#[cfg(test)]
mod tests;

use hsm::CalibrationHsm;

/// Area sums from the extra touchscreen data object, in channel units.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AreaMetrics {
    pub total: u16,
    pub touch: u16,
    pub anti_touch: u16,
}

impl AreaMetrics {
    pub const fn new(total: u16, touch: u16, anti_touch: u16) -> Self {
        Self {
            total,
            touch,
            anti_touch,
        }
    }

    pub fn from_payload(payload: &[u8; PAYLOAD_SIZE]) -> Self {
        Self {
            total: u16::from_le_bytes([payload[0], payload[1]]),
            touch: u16::from_le_bytes([payload[2], payload[3]]),
            anti_touch: u16::from_le_bytes([payload[4], payload[5]]),
        }
    }

    pub const fn is_quiet(&self) -> bool {
        self.touch == 0 && self.anti_touch == 0
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CalibrationPhase {
    /// Calibration finished; waiting for the first touch.
    #[default]
    Monitoring,
    FirstWindow,
    ConfirmationWindow,
    FinalWindow,
    Settled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CalibrationAction {
    /// Issue the calibrate command.
    Recalibrate,
    /// Write the acquisition auto-calibration field. Zero disables it.
    SetAutoCalibration(u8),
}

#[derive(Clone, Copy, Debug)]
pub struct ActionBuffer {
    len: usize,
    slots: [Option<CalibrationAction>; Self::MAX],
}

impl ActionBuffer {
    pub const MAX: usize = 4;

    pub const fn new() -> Self {
        Self {
            len: 0,
            slots: [None; Self::MAX],
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.slots = [None; Self::MAX];
    }

    pub fn push(&mut self, action: CalibrationAction) {
        if self.len >= Self::MAX {
            return;
        }
        self.slots[self.len] = Some(action);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalibrationAction> {
        self.slots[..self.len].iter().filter_map(Option::as_ref)
    }

    pub fn recalibrations(&self) -> usize {
        self.iter()
            .filter(|action| matches!(action, CalibrationAction::Recalibrate))
            .count()
    }

    pub fn contains_recalibrate(&self) -> bool {
        self.recalibrations() > 0
    }

    pub fn auto_calibration(&self) -> Option<u8> {
        self.iter()
            .filter_map(|action| match action {
                CalibrationAction::SetAutoCalibration(value) => Some(*value),
                CalibrationAction::Recalibrate => None,
            })
            .last()
    }
}

impl Default for ActionBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug)]
enum CalibrationEvent {
    Area {
        now_ms: u64,
        metrics: AreaMetrics,
        active_contacts: u8,
    },
    Contact {
        observation: ContactObservation,
        active_contacts: u8,
    },
    Deadline {
        now_ms: u64,
    },
    CalibrationStarted,
    NormalMode,
    DeviceReset,
    CalibrateFailed,
    Recalibrate {
        reason: &'static str,
    },
}

#[derive(Default)]
struct DispatchContext {
    actions: ActionBuffer,
}

impl DispatchContext {
    fn emit(&mut self, action: CalibrationAction) {
        self.actions.push(action);
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EngineOutput {
    pub actions: ActionBuffer,
    pub phase: CalibrationPhase,
}

pub struct CalibrationEngine {
    machine: statig::blocking::StateMachine<CalibrationHsm>,
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self::new(active_config().calibration)
    }
}

impl CalibrationEngine {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            machine: CalibrationHsm::new(config).state_machine(),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        self.machine.inner().config()
    }

    pub fn on_area_metrics(
        &mut self,
        now_ms: u64,
        metrics: AreaMetrics,
        active_contacts: u8,
    ) -> EngineOutput {
        self.dispatch(CalibrationEvent::Area {
            now_ms,
            metrics,
            active_contacts,
        })
    }

    pub fn on_contact(
        &mut self,
        observation: ContactObservation,
        active_contacts: u8,
    ) -> EngineOutput {
        self.dispatch(CalibrationEvent::Contact {
            observation,
            active_contacts,
        })
    }

    /// Fires the pending window if its deadline has passed.
    pub fn service_deadline(&mut self, now_ms: u64) -> EngineOutput {
        if !self.machine.inner().deadline_expired(now_ms) {
            return self.finish(DispatchContext::default());
        }
        self.dispatch(CalibrationEvent::Deadline { now_ms })
    }

    /// Device reported that a calibration is running.
    pub fn on_calibration_started(&mut self) -> EngineOutput {
        self.dispatch(CalibrationEvent::CalibrationStarted)
    }

    /// Device reported normal operation; a pending calibration completed.
    pub fn on_normal_mode(&mut self) -> EngineOutput {
        self.dispatch(CalibrationEvent::NormalMode)
    }

    pub fn on_device_reset(&mut self) -> EngineOutput {
        self.dispatch(CalibrationEvent::DeviceReset)
    }

    /// The calibrate command never reached the device, so no normal-mode
    /// status will follow it.
    pub fn on_calibrate_failed(&mut self) -> EngineOutput {
        self.dispatch(CalibrationEvent::CalibrateFailed)
    }

    pub fn request_recalibration(&mut self, reason: &'static str) -> EngineOutput {
        self.dispatch(CalibrationEvent::Recalibrate { reason })
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.machine.inner().phase()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.machine.inner().deadline()
    }

    pub fn is_busy(&self) -> bool {
        self.machine.inner().is_busy()
    }

    pub fn coincidence_suspected(&self) -> bool {
        self.machine.inner().coincidence_suspected()
    }

    pub fn pattern_tracking(&self) -> bool {
        self.machine.inner().pattern_tracking()
    }

    pub fn metrics(&self) -> AreaMetrics {
        self.machine.inner().metrics()
    }

    fn dispatch(&mut self, event: CalibrationEvent) -> EngineOutput {
        let mut context = DispatchContext::default();
        self.machine.handle_with_context(&event, &mut context);
        self.finish(context)
    }

    fn finish(&self, context: DispatchContext) -> EngineOutput {
        EngineOutput {
            actions: context.actions,
            phase: self.phase(),
        }
    }
}
