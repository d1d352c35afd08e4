use super::AreaMetrics;
use crate::config::CalibrationConfig;
use crate::tracker::{ContactObservation, ObservationKind, MAX_CONTACTS};

#[derive(Clone, Copy, Debug, Default)]
struct SlotMotion {
    x: u16,
    y: u16,
    /// Manhattan displacement of the latest move.
    distance: u16,
    stationary: u16,
    down: bool,
}

/// Per-slot mobility used to spot contacts that never move.
#[derive(Clone, Copy, Debug)]
pub(super) struct MotionHistory {
    slots: [SlotMotion; MAX_CONTACTS],
    highest_slot: u8,
    previous_slot: u8,
    release_limit: u16,
}

impl MotionHistory {
    pub(super) fn new(config: &CalibrationConfig) -> Self {
        Self {
            slots: [SlotMotion::default(); MAX_CONTACTS],
            highest_slot: 0,
            previous_slot: 0,
            release_limit: config.stationary_limit_near,
        }
    }

    pub(super) fn release_limit(&self) -> u16 {
        self.release_limit
    }

    pub(super) fn reset_limit(&mut self, config: &CalibrationConfig) {
        self.release_limit = config.stationary_limit_near;
    }

    pub(super) fn stationary_count(&self, slot: u8) -> u16 {
        self.slots
            .get(usize::from(slot))
            .map_or(0, |motion| motion.stationary)
    }

    pub(super) fn observe(
        &mut self,
        observation: &ContactObservation,
        metrics: AreaMetrics,
        config: &CalibrationConfig,
    ) {
        let index = usize::from(observation.slot);
        let Some(motion) = self.slots.get_mut(index) else {
            return;
        };

        match observation.kind {
            ObservationKind::Release => {
                motion.stationary = 0;
                motion.distance = 0;
                motion.down = false;
                return;
            }
            ObservationKind::Press => {
                motion.stationary = 0;
                motion.distance = 0;
            }
            ObservationKind::Move => {
                motion.distance = observation
                    .x
                    .abs_diff(motion.x)
                    .saturating_add(observation.y.abs_diff(motion.y));
                if motion.distance < config.stationary_distance {
                    let limit = if metrics.anti_touch >= metrics.touch {
                        Some(config.stationary_limit_near)
                    } else if u32::from(metrics.anti_touch) + u32::from(metrics.touch)
                        >= u32::from(config.strong_signal_sum)
                    {
                        Some(config.stationary_limit_far)
                    } else {
                        None
                    };
                    if let Some(limit) = limit {
                        self.release_limit = limit;
                        if motion.stationary < config.stationary_cap {
                            motion.stationary += 1;
                        }
                    }
                } else {
                    motion.stationary = 0;
                }
            }
        }

        motion.x = observation.x;
        motion.y = observation.y;
        motion.down = true;
        self.highest_slot = observation.slot.max(self.previous_slot);
        self.previous_slot = observation.slot;
    }

    /// True when every slot up to the highest one seen lately barely moved.
    /// Displacements of slots above that range are forgotten.
    pub(super) fn all_stationary(&mut self, config: &CalibrationConfig) -> bool {
        let highest = usize::from(self.highest_slot).min(MAX_CONTACTS - 1);
        for motion in &mut self.slots[highest + 1..] {
            motion.distance = 0;
        }
        self.slots[..=highest]
            .iter()
            .all(|motion| motion.distance < config.stationary_distance)
    }

    /// Whether the only contact currently down barely moved.
    pub(super) fn lone_contact_stationary(&self, config: &CalibrationConfig) -> bool {
        let motion = self
            .slots
            .iter()
            .find(|motion| motion.down)
            .unwrap_or(&self.slots[0]);
        motion.distance < config.stationary_distance
    }

    /// First tracked slot whose stationary streak passed the release limit.
    pub(super) fn over_limit(&self) -> Option<u8> {
        let highest = usize::from(self.highest_slot).min(MAX_CONTACTS - 1);
        self.slots[..=highest]
            .iter()
            .position(|motion| motion.stationary > self.release_limit)
            .map(|slot| slot as u8)
    }

    pub(super) fn clear_streaks(&mut self) {
        for motion in &mut self.slots {
            motion.stationary = 0;
        }
    }
}
