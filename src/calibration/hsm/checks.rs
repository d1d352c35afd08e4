use super::*;

/// Held contacts at the confirmation verdict above which touch area alone
/// cannot vouch for the calibration.
const VERDICT_CONTACT_LIMIT: u8 = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Verdict {
    Good(&'static str),
    Bad(&'static str),
}

impl CalibrationHsm {
    /// Compares touch and anti-touch area against the number of contacts
    /// down. Runs until the first window closes.
    pub(super) fn shape_check(&mut self, context: &mut DispatchContext) {
        let config = self.config;
        let AreaMetrics {
            total,
            touch,
            anti_touch,
        } = self.metrics;
        let contacts = u16::from(self.active_contacts);
        let all_stationary = self.motion.all_stationary(&config);
        let (touch_signed, anti_signed) = (i32::from(touch), i32::from(anti_touch));

        if contacts > 1 && touch <= config.multi_touch_ceiling {
            if contacts == 2 {
                if touch_signed < anti_signed - i32::from(config.two_contact_margin) {
                    self.request_recalibration(context, "two contacts, touch below anti-touch");
                }
            } else if touch <= contacts * config.per_contact_area + config.contact_area_offset {
                if self.coincidence || !all_stationary {
                    return;
                }
                if total < config.low_area_multi {
                    self.mid_streak = 0;
                    if Self::streak_complete(&mut self.low_streak, config.streak_length) {
                        self.suspect_coincidence(context, "stationary contacts with low area");
                    }
                } else {
                    self.low_streak = 0;
                    self.mid_streak = 0;
                }
            } else if touch_signed < anti_signed - i32::from(config.multi_contact_margin) {
                self.request_recalibration(context, "multiple contacts, touch below anti-touch");
            }
        } else if contacts > 1 && touch > config.multi_touch_large {
            if touch > anti_touch {
                self.request_recalibration(context, "multiple contacts, large touch area");
            }
        } else if contacts == 1 {
            if touch < config.single_touch_small && anti_touch <= config.single_anti_max {
                if self.coincidence || !self.motion.lone_contact_stationary(&config) {
                    return;
                }
                if total < config.low_area_single {
                    self.mid_streak = 0;
                    if Self::streak_complete(&mut self.low_streak, config.streak_length) {
                        self.suspect_coincidence(context, "floating object, low area");
                    }
                } else if total < config.high_area_single {
                    self.low_streak = 0;
                    if Self::streak_complete(&mut self.mid_streak, config.streak_length) {
                        self.suspect_coincidence(context, "floating object, mid area");
                    }
                } else {
                    self.low_streak = 0;
                    self.mid_streak = 0;
                }
            } else if touch > config.single_touch_large {
                self.request_recalibration(context, "single contact, touch area too large");
            }
        }
    }

    /// Many contacts covering almost no area look like a palm resting on a
    /// bad reference.
    pub(super) fn palm_check(&mut self, context: &mut DispatchContext) {
        let contacts = self.active_contacts;
        let palm_area = u32::from(contacts) * 2 + 2;
        if contacts >= self.config.palm_min_contacts && u32::from(self.metrics.total) < palm_area
        {
            if Self::streak_complete(&mut self.palm_streak, self.config.palm_streak) {
                self.request_recalibration(context, "palm");
            }
        } else {
            self.palm_streak = 0;
        }
    }

    pub(super) fn confirmation_check(&mut self, context: &mut DispatchContext) {
        let gap = i32::from(self.metrics.anti_touch) - i32::from(self.metrics.touch);
        if gap > self.config.anti_excess && self.metrics.touch < self.config.anti_excess_touch_max
        {
            self.request_recalibration(context, "confirmation, anti-touch excess");
        }
        if -gap > self.config.touch_excess {
            self.request_recalibration(context, "confirmation, touch excess");
        }
    }

    pub(super) fn verdict(&self) -> Verdict {
        let config = &self.config;
        let metrics = self.metrics;

        if self.press_count == self.release_count {
            if !metrics.is_quiet() {
                return Verdict::Bad("no contact held but area reported");
            }
            if self.baseline.is_quiet()
                && self.baseline.total == metrics.total
                && (metrics.total == 0 || metrics.total > config.quiet_total_max)
            {
                return Verdict::Bad("area unchanged since first window");
            }
            return Verdict::Good("quiet after release");
        }

        if metrics.anti_touch == 0 {
            return if self.widest_contact >= config.wide_contact_min {
                Verdict::Good("wide contact without anti-touch")
            } else {
                Verdict::Bad("narrow contact without anti-touch")
            };
        }

        if metrics.anti_touch < metrics.touch && self.active_contacts < VERDICT_CONTACT_LIMIT {
            return match self.active_contacts {
                2 if metrics.touch > config.two_contact_touch_min
                    && metrics.total >= config.two_contact_total_min =>
                {
                    Verdict::Good("two held contacts")
                }
                3 if metrics.touch > config.three_contact_touch_min
                    && metrics.total > config.three_contact_total_min =>
                {
                    Verdict::Good("three held contacts")
                }
                _ => Verdict::Bad("held contacts with weak touch area"),
            };
        }
        Verdict::Bad("anti-touch dominates held contacts")
    }

    fn suspect_coincidence(&mut self, context: &mut DispatchContext, reason: &'static str) {
        let value = self.config.auto_calibration_value;
        info!(
            "mxt: {}: auto-calibration {} tch={} atch={} total={}",
            reason, value, self.metrics.touch, self.metrics.anti_touch, self.metrics.total
        );
        context.emit(CalibrationAction::SetAutoCalibration(value));
        self.auto_calibration = value != 0;
        self.coincidence = true;
    }

    /// Counts one more qualifying report. Completes (and restarts) once the
    /// streak already holds `length` reports.
    fn streak_complete(counter: &mut u8, length: u8) -> bool {
        if *counter >= length {
            *counter = 0;
            true
        } else {
            *counter += 1;
            false
        }
    }
}
