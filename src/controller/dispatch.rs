use super::*;
use crate::{
    calibration::AreaMetrics,
    router::{self, Message, Route},
    tracker::{decode_key, decode_legacy, decode_v2, ContactReport, V2Message},
};

/// Command processor status bits.
const STATUS_BUS_CHECKSUM: u8 = 0x04;
const STATUS_CONFIG_ERROR: u8 = 0x08;
const STATUS_CALIBRATING: u8 = 0x10;
const STATUS_SIGNAL_ERROR: u8 = 0x20;
const STATUS_OVERFLOW: u8 = 0x40;
const STATUS_RESET: u8 = 0x80;

const SELF_TEST_PASSED: u8 = 0xFE;
const PALM_DETECT: u8 = 0x01;

impl<'a, B, P, D> Controller<'a, B, P, D>
where
    B: BusOps,
    B::Error: fmt::Debug,
    P: PendingSignal,
    D: DelayOps,
{
    /// Handles one message. Returns the end reason when the message closes
    /// the pass.
    pub(super) fn dispatch<S: EventSink>(
        &mut self,
        now_ms: u64,
        message: &Message,
        sink: &mut S,
    ) -> Result<Option<EndReason>, B::Error> {
        let directory = self.directory.as_ref().ok_or(Error::<B::Error>::NotAttached)?;
        let route = router::route(directory.report_ids(), message);
        let payload = &message.payload;

        match route {
            Route::End(reason) => return Ok(Some(reason)),
            Route::Command => self.handle_status(payload[0])?,
            Route::Touch { index } => {
                if let Some(report) = decode_legacy(index, payload, self.tracker.config()) {
                    self.handle_contact(report)?;
                }
            }
            Route::TouchV2 { index } => {
                if let V2Message::Contact(report) = decode_v2(index, payload) {
                    self.handle_contact(report)?;
                }
            }
            Route::Key { .. } => {
                for transition in self.tracker.apply_key(decode_key(payload)) {
                    sink.report_key(transition.key, transition.pressed);
                }
            }
            Route::AreaMetrics => {
                let metrics = AreaMetrics::from_payload(payload);
                let output =
                    self.engine
                        .on_area_metrics(now_ms, metrics, self.tracker.active_count());
                self.apply_actions(output)?;
            }
            Route::Timer { index } => {
                debug!("mxt: T61[{}] timer status {:#04x}", index, payload[0]);
            }
            Route::SelfTest => {
                if payload[0] != SELF_TEST_PASSED {
                    error!("mxt: self test failed {:02x?}", &payload[..4]);
                }
            }
            Route::Palm => {
                if payload[0] & PALM_DETECT != 0 {
                    info!("mxt: palm detected");
                } else {
                    info!("mxt: palm released");
                }
            }
            Route::NoiseSuppression => {
                debug!("mxt: noise suppression {:02x?}", &payload[..3]);
            }
            Route::Unhandled(_) => {}
        }
        Ok(None)
    }

    fn handle_contact(&mut self, report: ContactReport) -> Result<(), B::Error> {
        let Some(observation) = self.tracker.apply(report) else {
            return Ok(());
        };
        let output = self
            .engine
            .on_contact(observation, self.tracker.active_count());
        self.apply_actions(output)
    }

    fn handle_status(&mut self, status: u8) -> Result<(), B::Error> {
        if status == 0 {
            debug!("mxt: normal mode");
            self.engine.on_normal_mode();
            return Ok(());
        }
        if status & STATUS_BUS_CHECKSUM != 0 {
            error!("mxt: bus checksum error");
        }
        if status & STATUS_CONFIG_ERROR != 0 {
            error!("mxt: config error");
        }
        if status & STATUS_CALIBRATING != 0 {
            info!("mxt: calibrating");
            let output = self.engine.on_calibration_started();
            self.apply_actions(output)?;
        }
        if status & STATUS_SIGNAL_ERROR != 0 {
            error!("mxt: signal error");
        }
        if status & STATUS_OVERFLOW != 0 {
            error!("mxt: message overflow");
        }
        if status & STATUS_RESET != 0 {
            info!("mxt: device reset");
            self.engine.on_device_reset();
            self.tracker.release_all();
            if self.profile == PowerProfile::Charger {
                self.apply_selected_profile()?;
            }
        }
        Ok(())
    }
}
