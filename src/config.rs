use serde::Deserialize;

use crate::tracker::MAX_CONTACTS;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub max_slots: u8,
    pub max_x: u16,
    pub max_y: u16,
    /// Legacy 12-bit coordinates are scaled down when the axis maximum is
    /// below this value.
    pub coordinate_shift_threshold: u16,
    pub coordinate_shift: u8,
}

impl TrackerConfig {
    pub const DEFAULT: Self = Self {
        max_slots: MAX_CONTACTS as u8,
        max_x: 719,
        max_y: 1279,
        coordinate_shift_threshold: 1024,
        coordinate_shift: 2,
    };
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    pub first_window_ms: u64,
    pub confirmation_window_ms: u64,
    pub final_window_ms: u64,
    /// T8 auto-calibration value written when a stationary foreign object is
    /// suspected.
    pub auto_calibration_value: u8,
    pub stationary_distance: u16,
    pub stationary_limit_near: u16,
    pub stationary_limit_far: u16,
    pub strong_signal_sum: u16,
    pub stationary_cap: u16,
    pub streak_length: u8,
    pub multi_touch_ceiling: u16,
    pub multi_touch_large: u16,
    pub two_contact_margin: u16,
    pub multi_contact_margin: u16,
    pub per_contact_area: u16,
    pub contact_area_offset: u16,
    pub low_area_multi: u16,
    pub low_area_single: u16,
    pub high_area_single: u16,
    pub single_touch_small: u16,
    pub single_anti_max: u16,
    pub single_touch_large: u16,
    pub palm_min_contacts: u8,
    pub palm_streak: u8,
    pub anti_excess: i32,
    pub anti_excess_touch_max: u16,
    pub touch_excess: i32,
    pub quiet_total_max: u16,
    pub wide_contact_min: u8,
    pub two_contact_touch_min: u16,
    pub two_contact_total_min: u16,
    pub three_contact_touch_min: u16,
    pub three_contact_total_min: u16,
}

impl CalibrationConfig {
    pub const DEFAULT: Self = Self {
        first_window_ms: 1_000,
        confirmation_window_ms: 3_000,
        final_window_ms: 5_000,
        auto_calibration_value: 5,
        stationary_distance: 3,
        stationary_limit_near: 3,
        stationary_limit_far: 10,
        strong_signal_sum: 80,
        stationary_cap: 20_000,
        streak_length: 7,
        multi_touch_ceiling: 45,
        multi_touch_large: 48,
        two_contact_margin: 3,
        multi_contact_margin: 2,
        per_contact_area: 4,
        contact_area_offset: 2,
        low_area_multi: 18,
        low_area_single: 18,
        high_area_single: 35,
        single_touch_small: 7,
        single_anti_max: 1,
        single_touch_large: 25,
        palm_min_contacts: 5,
        palm_streak: 5,
        anti_excess: 15,
        anti_excess_touch_max: 25,
        touch_excess: 48,
        quiet_total_max: 12,
        wide_contact_min: 35,
        two_contact_touch_min: 12,
        two_contact_total_min: 1,
        three_contact_touch_min: 18,
        three_contact_total_min: 8,
    };
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub bus_attempts: u8,
    pub reset_settle_ms: u32,
    pub reset_poll_ms: u32,
    pub reset_poll_limit: u8,
    pub backup_settle_ms: u32,
    /// Upper bound on messages handled in one drain pass when the pending
    /// line stays asserted.
    pub max_messages_per_pass: u16,
    pub calibrate_on_resume: bool,
}

impl ControllerConfig {
    pub const DEFAULT: Self = Self {
        bus_attempts: 3,
        reset_settle_ms: 100,
        reset_poll_ms: 10,
        reset_poll_limit: 20,
        backup_settle_ms: 25,
        max_messages_per_pass: 256,
        calibrate_on_resume: false,
    };
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    pub tracker: TrackerConfig,
    pub calibration: CalibrationConfig,
    pub controller: ControllerConfig,
}

impl DriverConfig {
    pub const DEFAULT: Self = Self {
        tracker: TrackerConfig::DEFAULT,
        calibration: CalibrationConfig::DEFAULT,
        controller: ControllerConfig::DEFAULT,
    };
}

static DRIVER_CONFIG: DriverConfig = DriverConfig::DEFAULT;

pub fn active_config() -> &'static DriverConfig {
    &DRIVER_CONFIG
}
