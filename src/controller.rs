//! Device lifecycle and the interrupt drain loop.
//!
//! [`Controller`] owns the bus, the object directory, the contact tracker
//! and the calibration engine. The interrupt worker calls [`Controller::drain`]
//! whenever the pending line asserts; control paths (attach, suspend,
//! resume, profile switch) take `&mut self` as well.

use core::fmt;

use log::{debug, error, info, warn};

use crate::{
    calibration::{CalibrationAction, CalibrationEngine, EngineOutput},
    commands::{self, Command, BACKUP_VALUE, CALIBRATE_VALUE, RESET_VALUE},
    config::DriverConfig,
    config_sync::{self, ConfigBlob, ConfigSynchronizer, PowerProfile, SyncOutcome},
    error::{Error, Result},
    objects::{read_directory, InfoBlock, ObjectDirectory},
    platform::{BusOps, DelayOps, EventSink, PendingSignal, RetryBus},
    router::EndReason,
    tracker::ContactTracker,
};

mod dispatch;

/// What attach found on the device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AttachReport {
    pub info: InfoBlock,
    pub objects: usize,
    pub max_report_id: u8,
    /// `None` when no configuration blob was supplied.
    pub sync: Option<SyncOutcome>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DrainReport {
    /// Messages handled, not counting the one that ended the pass.
    pub messages: u16,
    /// Messages whose side effects (command or config writes) failed.
    pub errors: u16,
    pub batch_reported: bool,
    pub end: Option<EndReason>,
}

pub struct Controller<'a, B, P, D> {
    bus: RetryBus<B>,
    pending: P,
    delay: D,
    config: DriverConfig,
    directory: Option<ObjectDirectory>,
    tracker: ContactTracker,
    engine: CalibrationEngine,
    blob: Option<ConfigBlob<'a>>,
    profile: PowerProfile,
    enabled: bool,
}

impl<'a, B, P, D> Controller<'a, B, P, D>
where
    B: BusOps,
    B::Error: fmt::Debug,
    P: PendingSignal,
    D: DelayOps,
{
    pub fn new(bus: B, pending: P, delay: D, config: DriverConfig) -> Self {
        Self {
            bus: RetryBus::new(bus, config.controller.bus_attempts),
            pending,
            delay,
            config,
            directory: None,
            tracker: ContactTracker::new(config.tracker),
            engine: CalibrationEngine::new(config.calibration),
            blob: None,
            profile: PowerProfile::default(),
            enabled: false,
        }
    }

    pub fn with_blob(mut self, blob: ConfigBlob<'a>) -> Self {
        self.blob = Some(blob);
        self
    }

    /// Takes effect at the next attach.
    pub fn set_blob(&mut self, blob: Option<ConfigBlob<'a>>) {
        self.blob = blob;
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn directory(&self) -> Option<&ObjectDirectory> {
        self.directory.as_ref()
    }

    pub fn tracker(&self) -> &ContactTracker {
        &self.tracker
    }

    pub fn engine(&self) -> &CalibrationEngine {
        &self.engine
    }

    pub fn profile(&self) -> PowerProfile {
        self.profile
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn bus(&self) -> &B {
        self.bus.inner()
    }

    pub fn bus_mut(&mut self) -> &mut B {
        self.bus.inner_mut()
    }

    pub fn release(self) -> (B, P, D) {
        (self.bus.into_inner(), self.pending, self.delay)
    }

    /// Reads the object table, brings the configuration in line with the
    /// blob and enables message processing. On failure the controller stays
    /// disabled with no directory.
    ///
    /// Attach has no sink: contacts still down are dropped without a release.
    /// Call [`Controller::detach`] first when re-attaching a live controller.
    pub fn attach(&mut self) -> Result<AttachReport, B::Error> {
        let held = self.tracker.active_count();
        if held > 0 {
            warn!("mxt: attach drops {} held contacts, detach first", held);
        }
        self.enabled = false;
        self.directory = None;
        self.tracker.reset();

        match self.bring_up() {
            Ok(report) => {
                self.enabled = true;
                Ok(report)
            }
            Err(err) => {
                error!("mxt: attach failed: {}", err);
                self.directory = None;
                Err(err)
            }
        }
    }

    fn bring_up(&mut self) -> Result<AttachReport, B::Error> {
        let directory = read_directory(&mut self.bus)?;
        let info = *directory.info();
        let objects = directory.objects().len();
        let max_report_id = directory.max_report_id();
        debug!("mxt: {} objects, max report id {}", objects, max_report_id);
        self.directory = Some(directory);

        let sync = match self.blob {
            Some(blob) => {
                let outcome = self.sync_config(&blob)?;
                if let SyncOutcome::Applied { records } = outcome {
                    info!("mxt: {} config records written, persisting", records);
                    self.persist()?;
                    self.soft_reset()?;
                }
                Some(outcome)
            }
            None => {
                debug!("mxt: no config blob, device config left as is");
                None
            }
        };

        self.discard_pending()?;
        self.engine.on_device_reset();

        Ok(AttachReport {
            info,
            objects,
            max_report_id,
            sync,
        })
    }

    fn sync_config(&mut self, blob: &ConfigBlob<'_>) -> Result<SyncOutcome, B::Error> {
        let profile = self.profile;
        let directory = self.directory.as_ref().ok_or(Error::<B::Error>::NotAttached)?;
        ConfigSynchronizer::new(move || profile).sync(&mut self.bus, directory, blob)
    }

    /// One interrupt pass: expired windows first, then messages until the
    /// queue is empty, then a single flush to `sink`. Failed writes made while
    /// handling a message are counted in the report and the pass goes on;
    /// only a failed message read ends it early. The flush always runs.
    pub fn drain<S: EventSink>(
        &mut self,
        now_ms: u64,
        sink: &mut S,
    ) -> Result<DrainReport, B::Error> {
        let mut report = DrainReport::default();
        if !self.enabled {
            debug!("mxt: drain while disabled ignored");
            return Ok(report);
        }

        if let Err(err) = self.service_timers(now_ms) {
            warn!("mxt: calibration window action failed: {}", err);
            report.errors += 1;
        }
        let outcome = self.read_messages(now_ms, sink, &mut report);
        report.batch_reported = self.flush(sink);

        if let Err(err) = &outcome {
            warn!(
                "mxt: drain pass ended after {} messages: {}",
                report.messages, err
            );
        }
        outcome.map(|()| report)
    }

    /// Fires the calibration window deadline if it has passed.
    pub fn service_timers(&mut self, now_ms: u64) -> Result<(), B::Error> {
        let output = self.engine.service_deadline(now_ms);
        self.apply_actions(output)
    }

    fn read_messages<S: EventSink>(
        &mut self,
        now_ms: u64,
        sink: &mut S,
        report: &mut DrainReport,
    ) -> Result<(), B::Error> {
        for _ in 0..self.config.controller.max_messages_per_pass {
            let message = {
                let directory = self.directory.as_ref().ok_or(Error::<B::Error>::NotAttached)?;
                commands::read_message(&mut self.bus, directory)?
            };
            match self.dispatch(now_ms, &message, sink) {
                Ok(Some(end)) => {
                    report.end = Some(end);
                    return Ok(());
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "mxt: report id {} handled with error: {}",
                        message.report_id, err
                    );
                    report.errors = report.errors.saturating_add(1);
                }
            }
            report.messages += 1;
            if !self.pending.is_pending() {
                return Ok(());
            }
        }
        warn!(
            "mxt: pending line still asserted after {} messages",
            report.messages
        );
        Ok(())
    }

    fn flush<S: EventSink>(&mut self, sink: &mut S) -> bool {
        match self.tracker.flush() {
            Some(batch) => {
                sink.report(&batch);
                true
            }
            None => false,
        }
    }

    /// Reports every held contact and key as released.
    fn release_contacts<S: EventSink>(&mut self, sink: &mut S) -> usize {
        let released = self.tracker.release_all();
        self.flush(sink);
        if let Some(transition) = self.tracker.release_key() {
            sink.report_key(transition.key, transition.pressed);
        }
        released
    }

    /// Releases everything still down and stops processing messages.
    pub fn suspend<S: EventSink>(&mut self, sink: &mut S) {
        if !self.enabled {
            return;
        }
        let released = self.release_contacts(sink);
        self.engine.on_device_reset();
        self.enabled = false;
        info!("mxt: suspended, {} contacts released", released);
    }

    pub fn resume(&mut self) -> Result<(), B::Error> {
        if self.directory.is_none() {
            return Err(Error::NotAttached);
        }
        if self.enabled {
            return Ok(());
        }
        // Messages queued while suspended describe contacts already released.
        self.discard_pending()?;
        self.enabled = true;
        info!("mxt: resumed");
        if self.config.controller.calibrate_on_resume {
            self.calibrate()?;
        }
        Ok(())
    }

    /// Drops the directory and stops processing; attach starts over.
    pub fn detach<S: EventSink>(&mut self, sink: &mut S) {
        self.release_contacts(sink);
        self.tracker.reset();
        self.engine.on_device_reset();
        self.enabled = false;
        self.directory = None;
        info!("mxt: detached");
    }

    /// Selects the configuration profile. When attached with a dual blob the
    /// profile is written right away and a calibration requested; otherwise
    /// it is used by the next attach. Returns whether anything was written.
    pub fn set_power_profile(&mut self, profile: PowerProfile) -> Result<bool, B::Error> {
        if self.profile == profile {
            return Ok(false);
        }
        info!("mxt: power profile {:?} -> {:?}", self.profile, profile);
        self.profile = profile;
        if !self.enabled {
            debug!("mxt: profile switch deferred until attach");
            return Ok(false);
        }
        self.apply_selected_profile()
    }

    fn apply_selected_profile(&mut self) -> Result<bool, B::Error> {
        let Some(blob) = self.blob else {
            return Ok(false);
        };
        if blob.profile_count() < 2 {
            debug!("mxt: single profile blob, nothing to switch");
            return Ok(false);
        }
        let directory = self.directory.as_ref().ok_or(Error::<B::Error>::NotAttached)?;
        config_sync::apply_profile(&mut self.bus, directory, &blob, self.profile)?;
        let output = self.engine.request_recalibration("power profile change");
        self.apply_actions(output)?;
        Ok(true)
    }

    /// Requests a calibration through the engine, so a request made while one
    /// is already running is absorbed. Returns whether the command went out.
    pub fn calibrate(&mut self) -> Result<bool, B::Error> {
        if self.directory.is_none() {
            return Err(Error::NotAttached);
        }
        let output = self.engine.request_recalibration("host request");
        let issued = output.actions.contains_recalibrate();
        self.apply_actions(output)?;
        Ok(issued)
    }

    /// Stores the live configuration in non-volatile memory.
    pub fn backup(&mut self) -> Result<(), B::Error> {
        self.persist()
    }

    /// Soft-resets the device. Contacts still down are reported released.
    pub fn reset<S: EventSink>(&mut self, sink: &mut S) -> Result<(), B::Error> {
        if self.directory.is_none() {
            return Err(Error::NotAttached);
        }
        self.release_contacts(sink);
        self.engine.on_device_reset();
        self.soft_reset()?;
        self.discard_pending()
    }

    fn persist(&mut self) -> Result<(), B::Error> {
        self.command(Command::BackupNv, BACKUP_VALUE)?;
        self.delay.delay_ms(self.config.controller.backup_settle_ms);
        Ok(())
    }

    fn soft_reset(&mut self) -> Result<(), B::Error> {
        self.command(Command::Reset, RESET_VALUE)?;
        self.wait_for_pending();
        Ok(())
    }

    /// After a reset the device announces itself by asserting the pending
    /// line. Gives up quietly after the poll limit.
    fn wait_for_pending(&mut self) {
        let config = self.config.controller;
        self.delay.delay_ms(config.reset_settle_ms);
        let mut polls = 0;
        while !self.pending.is_pending() && polls < config.reset_poll_limit {
            self.delay.delay_ms(config.reset_poll_ms);
            polls += 1;
        }
        if polls >= config.reset_poll_limit {
            debug!(
                "mxt: no message after reset within {} ms",
                config.reset_settle_ms + u32::from(polls) * config.reset_poll_ms
            );
        }
    }

    fn discard_pending(&mut self) -> Result<(), B::Error> {
        let directory = self.directory.as_ref().ok_or(Error::<B::Error>::NotAttached)?;
        commands::drain_pending(&mut self.bus, directory)
    }

    fn command(&mut self, command: Command, value: u8) -> Result<(), B::Error> {
        let directory = self.directory.as_ref().ok_or(Error::<B::Error>::NotAttached)?;
        commands::write_command(&mut self.bus, directory, command, value)
    }

    fn apply_actions(&mut self, output: EngineOutput) -> Result<(), B::Error> {
        for action in output.actions.iter() {
            let directory = self.directory.as_ref().ok_or(Error::<B::Error>::NotAttached)?;
            match *action {
                CalibrationAction::Recalibrate => {
                    let written = commands::write_command(
                        &mut self.bus,
                        directory,
                        Command::Calibrate,
                        CALIBRATE_VALUE,
                    );
                    if written.is_err() {
                        self.engine.on_calibrate_failed();
                    }
                    written?
                }
                CalibrationAction::SetAutoCalibration(value) => {
                    commands::write_auto_calibration(&mut self.bus, directory, value)?
                }
            }
        }
        Ok(())
    }
}
