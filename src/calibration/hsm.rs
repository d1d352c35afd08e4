use log::{debug, info, warn};
use statig::prelude::*;

use super::movement::MotionHistory;
use super::*;
use crate::tracker::ObservationKind;

mod checks;

use checks::Verdict;

pub(super) struct CalibrationHsm {
    config: CalibrationConfig,
    phase: CalibrationPhase,
    metrics: AreaMetrics,
    /// Metrics frozen when the first window closed.
    baseline: AreaMetrics,
    /// Contacts down when the latest area report arrived.
    active_contacts: u8,
    deadline: Option<u64>,
    busy: bool,
    coincidence: bool,
    auto_calibration: bool,
    pattern_tracking: bool,
    press_count: u16,
    release_count: u16,
    widest_contact: u8,
    low_streak: u8,
    mid_streak: u8,
    palm_streak: u8,
    motion: MotionHistory,
}

impl CalibrationHsm {
    pub(super) fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            phase: CalibrationPhase::Monitoring,
            metrics: AreaMetrics::default(),
            baseline: AreaMetrics::default(),
            active_contacts: 0,
            deadline: None,
            busy: false,
            coincidence: false,
            auto_calibration: false,
            pattern_tracking: false,
            press_count: 0,
            release_count: 0,
            widest_contact: 0,
            low_streak: 0,
            mid_streak: 0,
            palm_streak: 0,
            motion: MotionHistory::new(&config),
        }
    }

    pub(super) fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub(super) fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub(super) fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub(super) fn deadline_expired(&self, now_ms: u64) -> bool {
        self.deadline.is_some_and(|deadline| now_ms >= deadline)
    }

    pub(super) fn is_busy(&self) -> bool {
        self.busy
    }

    pub(super) fn coincidence_suspected(&self) -> bool {
        self.coincidence
    }

    pub(super) fn pattern_tracking(&self) -> bool {
        self.pattern_tracking
    }

    pub(super) fn metrics(&self) -> AreaMetrics {
        self.metrics
    }

    fn arm_deadline(&mut self, now_ms: u64, window_ms: u64) {
        self.deadline = Some(now_ms.saturating_add(window_ms));
    }

    fn record_area(&mut self, metrics: AreaMetrics, active_contacts: u8) {
        self.metrics = metrics;
        self.active_contacts = active_contacts;
    }

    fn request_recalibration(&mut self, context: &mut DispatchContext, reason: &'static str) {
        if self.busy {
            debug!("mxt: recalibration ({}) absorbed, calibration pending", reason);
            return;
        }
        info!(
            "mxt: recalibrate: {} tch={} atch={} total={} contacts={}",
            reason,
            self.metrics.touch,
            self.metrics.anti_touch,
            self.metrics.total,
            self.active_contacts
        );
        self.busy = true;
        context.emit(CalibrationAction::Recalibrate);
    }

    /// Anti-touch area with no touch area means the reference is wrong.
    fn trigger_stage(&mut self, context: &mut DispatchContext) -> bool {
        if self.metrics.touch == 0 && self.metrics.anti_touch > 0 {
            self.request_recalibration(context, "anti-touch without touch");
            return true;
        }
        false
    }

    fn observe_contact(
        &mut self,
        context: &mut DispatchContext,
        observation: &ContactObservation,
        active_contacts: u8,
    ) {
        match observation.kind {
            ObservationKind::Press => self.press_count = self.press_count.saturating_add(1),
            ObservationKind::Release => {
                self.release_count = self.release_count.saturating_add(1)
            }
            ObservationKind::Move => {}
        }
        if observation.kind != ObservationKind::Release {
            self.widest_contact = self.widest_contact.max(observation.width);
        }

        self.motion.observe(observation, self.metrics, &self.config);
        if observation.kind == ObservationKind::Release
            || !self.pattern_tracking
            || active_contacts == 0
        {
            return;
        }

        if let Some(slot) = self.motion.over_limit() {
            info!(
                "mxt: slot {} stationary for {} samples (limit {})",
                slot,
                self.motion.stationary_count(slot),
                self.motion.release_limit()
            );
            self.press_count = 0;
            self.release_count = 0;
            self.pattern_tracking = false;
            self.motion.reset_limit(&self.config);
            self.request_recalibration(context, "stationary contact pattern");
        }
    }

    fn calibration_started(&mut self, context: &mut DispatchContext) {
        info!(
            "mxt: calibration running (pattern tracking {})",
            if self.pattern_tracking { "on" } else { "off" }
        );
        context.emit(CalibrationAction::SetAutoCalibration(0));
        self.auto_calibration = false;
        self.coincidence = false;
        self.deadline = None;
        self.busy = true;
        self.pattern_tracking = false;
        self.press_count = 0;
        self.release_count = 0;
        self.widest_contact = 0;
        self.low_streak = 0;
        self.mid_streak = 0;
        self.palm_streak = 0;
        self.motion.clear_streaks();
        self.motion.reset_limit(&self.config);
    }

    fn reinitialize(&mut self) {
        info!("mxt: device reset, calibration checks reinitialized");
        *self = Self::new(self.config);
    }

    fn enter_monitoring(&mut self) -> Outcome<State> {
        self.phase = CalibrationPhase::Monitoring;
        Transition(State::monitoring())
    }
}

#[state_machine(initial = "State::monitoring()")]
impl CalibrationHsm {
    #[state(superstate = "tracking")]
    fn monitoring(
        &mut self,
        context: &mut DispatchContext,
        event: &CalibrationEvent,
    ) -> Outcome<State> {
        match event {
            CalibrationEvent::Area {
                now_ms,
                metrics,
                active_contacts,
            } => {
                self.record_area(*metrics, *active_contacts);
                if self.trigger_stage(context) {
                    return Handled;
                }

                let first_touch = metrics.touch > 0;
                if first_touch {
                    self.coincidence = false;
                    self.arm_deadline(*now_ms, self.config.first_window_ms);
                    info!(
                        "mxt: first touch after calibration, tch={} atch={} total={}",
                        metrics.touch, metrics.anti_touch, metrics.total
                    );
                }
                self.shape_check(context);
                self.palm_check(context);

                if first_touch {
                    self.phase = CalibrationPhase::FirstWindow;
                    return Transition(State::first_window());
                }
                Handled
            }
            _ => Super,
        }
    }

    #[state(superstate = "tracking")]
    fn first_window(
        &mut self,
        context: &mut DispatchContext,
        event: &CalibrationEvent,
    ) -> Outcome<State> {
        match event {
            CalibrationEvent::Area {
                metrics,
                active_contacts,
                ..
            } => {
                self.record_area(*metrics, *active_contacts);
                if self.trigger_stage(context) {
                    return Handled;
                }
                self.shape_check(context);
                self.palm_check(context);
                Handled
            }
            CalibrationEvent::Deadline { now_ms } if self.deadline_expired(*now_ms) => {
                self.deadline = None;
                self.coincidence = false;
                context.emit(CalibrationAction::SetAutoCalibration(0));

                if self.auto_calibration {
                    self.auto_calibration = false;
                    info!(
                        "mxt: auto-calibration still running, first window restarted tch={} atch={} total={}",
                        self.metrics.touch, self.metrics.anti_touch, self.metrics.total
                    );
                    self.arm_deadline(*now_ms, self.config.first_window_ms);
                    return Handled;
                }

                info!(
                    "mxt: first window good tch={} atch={} total={}",
                    self.metrics.touch, self.metrics.anti_touch, self.metrics.total
                );
                self.baseline = self.metrics;
                self.arm_deadline(*now_ms, self.config.confirmation_window_ms);
                self.phase = CalibrationPhase::ConfirmationWindow;
                Transition(State::confirmation_window())
            }
            _ => Super,
        }
    }

    #[state(superstate = "tracking")]
    fn confirmation_window(
        &mut self,
        context: &mut DispatchContext,
        event: &CalibrationEvent,
    ) -> Outcome<State> {
        match event {
            CalibrationEvent::Area {
                metrics,
                active_contacts,
                ..
            } => {
                self.record_area(*metrics, *active_contacts);
                if self.trigger_stage(context) {
                    return Handled;
                }
                self.confirmation_check(context);
                Handled
            }
            CalibrationEvent::Deadline { now_ms } if self.deadline_expired(*now_ms) => {
                self.deadline = None;
                match self.verdict() {
                    Verdict::Good(reason) => {
                        info!(
                            "mxt: calibration confirmed ({}) tch={} atch={} total={} contacts={}",
                            reason,
                            self.metrics.touch,
                            self.metrics.anti_touch,
                            self.metrics.total,
                            self.active_contacts
                        );
                        self.pattern_tracking = true;
                        self.arm_deadline(*now_ms, self.config.final_window_ms);
                        self.phase = CalibrationPhase::FinalWindow;
                        Transition(State::final_window())
                    }
                    Verdict::Bad(reason) => {
                        self.request_recalibration(context, reason);
                        self.enter_monitoring()
                    }
                }
            }
            _ => Super,
        }
    }

    #[state(superstate = "tracking")]
    fn final_window(
        &mut self,
        context: &mut DispatchContext,
        event: &CalibrationEvent,
    ) -> Outcome<State> {
        match event {
            CalibrationEvent::Area {
                metrics,
                active_contacts,
                ..
            } => {
                self.record_area(*metrics, *active_contacts);
                self.trigger_stage(context);
                Handled
            }
            CalibrationEvent::Deadline { now_ms } if self.deadline_expired(*now_ms) => {
                self.deadline = None;
                if self.metrics.touch < self.metrics.anti_touch {
                    self.request_recalibration(context, "anti-touch above touch at final window");
                    return self.enter_monitoring();
                }
                info!(
                    "mxt: calibration good tch={} atch={} total={}",
                    self.metrics.touch, self.metrics.anti_touch, self.metrics.total
                );
                self.phase = CalibrationPhase::Settled;
                Transition(State::settled())
            }
            _ => Super,
        }
    }

    #[state(superstate = "tracking")]
    fn settled(
        &mut self,
        context: &mut DispatchContext,
        event: &CalibrationEvent,
    ) -> Outcome<State> {
        match event {
            CalibrationEvent::Area {
                metrics,
                active_contacts,
                ..
            } => {
                self.record_area(*metrics, *active_contacts);
                self.trigger_stage(context);
                Handled
            }
            _ => Super,
        }
    }

    #[superstate]
    fn tracking(
        &mut self,
        context: &mut DispatchContext,
        event: &CalibrationEvent,
    ) -> Outcome<State> {
        match event {
            CalibrationEvent::Contact {
                observation,
                active_contacts,
            } => {
                self.observe_contact(context, observation, *active_contacts);
                Handled
            }
            CalibrationEvent::CalibrationStarted => {
                self.calibration_started(context);
                self.enter_monitoring()
            }
            CalibrationEvent::DeviceReset => {
                self.reinitialize();
                Transition(State::monitoring())
            }
            CalibrationEvent::NormalMode => {
                if self.busy {
                    debug!("mxt: normal mode, calibration finished");
                }
                self.busy = false;
                Handled
            }
            CalibrationEvent::CalibrateFailed => {
                warn!("mxt: calibrate command failed, accepting new requests");
                self.busy = false;
                Handled
            }
            CalibrationEvent::Recalibrate { reason } => {
                self.request_recalibration(context, *reason);
                Handled
            }
            CalibrationEvent::Area { .. } | CalibrationEvent::Deadline { .. } => Handled,
        }
    }
}
