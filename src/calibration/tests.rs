use super::*;
use crate::test_support::init_logging;
use crate::tracker::ObservationKind;

fn engine() -> CalibrationEngine {
    init_logging();
    CalibrationEngine::new(CalibrationConfig::DEFAULT)
}

fn area(
    engine: &mut CalibrationEngine,
    now_ms: u64,
    (total, touch, anti_touch): (u16, u16, u16),
    contacts: u8,
) -> EngineOutput {
    engine.on_area_metrics(now_ms, AreaMetrics::new(total, touch, anti_touch), contacts)
}

fn contact(slot: u8, kind: ObservationKind, x: u16, y: u16, width: u8) -> ContactObservation {
    ContactObservation {
        slot,
        kind,
        x,
        y,
        width,
    }
}

/// Drives a fresh engine through the first window with one light touch.
fn into_confirmation(engine: &mut CalibrationEngine) {
    area(engine, 0, (12, 10, 2), 1);
    assert_eq!(engine.phase(), CalibrationPhase::FirstWindow);
    let output = engine.service_deadline(1_000);
    assert_eq!(output.phase, CalibrationPhase::ConfirmationWindow);
}

fn into_final(engine: &mut CalibrationEngine) {
    into_confirmation(engine);
    area(engine, 1_500, (0, 0, 0), 0);
    let output = engine.service_deadline(4_000);
    assert!(output.actions.is_empty());
    assert_eq!(output.phase, CalibrationPhase::FinalWindow);
}

#[test]
fn anti_touch_without_touch_requests_single_recalibration() {
    let mut engine = engine();

    let output = area(&mut engine, 0, (5, 0, 5), 0);
    assert_eq!(output.actions.recalibrations(), 1);
    assert_eq!(output.actions.len(), 1);
    assert!(engine.is_busy());
    assert_eq!(engine.phase(), CalibrationPhase::Monitoring);
    assert_eq!(engine.deadline(), None);

    let repeat = area(&mut engine, 10, (5, 0, 5), 0);
    assert!(repeat.actions.is_empty());
}

#[test]
fn normal_mode_clears_busy_flag() {
    let mut engine = engine();
    assert!(engine.request_recalibration("test").actions.contains_recalibrate());
    assert!(engine.request_recalibration("test").actions.is_empty());

    engine.on_normal_mode();
    assert!(!engine.is_busy());
    assert!(engine.request_recalibration("test").actions.contains_recalibrate());
}

#[test]
fn first_touch_arms_first_window() {
    let mut engine = engine();

    let output = area(&mut engine, 200, (12, 10, 2), 1);
    assert!(output.actions.is_empty());
    assert_eq!(output.phase, CalibrationPhase::FirstWindow);
    assert_eq!(engine.deadline(), Some(1_200));

    let early = engine.service_deadline(1_199);
    assert!(early.actions.is_empty());
    assert_eq!(early.phase, CalibrationPhase::FirstWindow);

    let expired = engine.service_deadline(1_200);
    assert_eq!(expired.actions.auto_calibration(), Some(0));
    assert_eq!(expired.phase, CalibrationPhase::ConfirmationWindow);
    assert_eq!(engine.deadline(), Some(4_200));
}

#[test]
fn quiet_confirmation_settles_after_final_window() {
    let mut engine = engine();
    into_final(&mut engine);
    assert!(engine.pattern_tracking());
    assert_eq!(engine.deadline(), Some(9_000));

    let output = engine.service_deadline(9_000);
    assert!(output.actions.is_empty());
    assert_eq!(output.phase, CalibrationPhase::Settled);
    assert_eq!(engine.deadline(), None);
}

#[test]
fn confirmation_window_rejects_area_imbalance() {
    let mut engine = engine();
    into_confirmation(&mut engine);
    let output = area(&mut engine, 1_200, (30, 5, 25), 1);
    assert!(output.actions.contains_recalibrate());

    let mut engine = self::engine();
    into_confirmation(&mut engine);
    let output = area(&mut engine, 1_200, (70, 60, 5), 1);
    assert!(output.actions.contains_recalibrate());

    let mut engine = self::engine();
    into_confirmation(&mut engine);
    let output = area(&mut engine, 1_200, (40, 30, 20), 1);
    assert!(output.actions.is_empty());
}

#[test]
fn unchanged_quiet_area_fails_confirmation() {
    let mut engine = engine();
    area(&mut engine, 0, (12, 10, 2), 1);
    // Area drops to nothing before the first window closes and stays there.
    area(&mut engine, 500, (0, 0, 0), 0);
    engine.service_deadline(1_000);

    let output = engine.service_deadline(4_000);
    assert!(output.actions.contains_recalibrate());
    assert_eq!(output.phase, CalibrationPhase::Monitoring);
    assert!(!engine.pattern_tracking());
}

#[test]
fn held_contact_verdict_depends_on_width() {
    for (width, good) in [(10u8, false), (40u8, true)] {
        let mut engine = engine();
        area(&mut engine, 0, (12, 10, 0), 1);
        engine.on_contact(contact(0, ObservationKind::Press, 100, 100, width), 1);
        engine.service_deadline(1_000);
        area(&mut engine, 2_000, (12, 20, 0), 1);

        let output = engine.service_deadline(4_000);
        assert_eq!(output.actions.contains_recalibrate(), !good);
        let expected = if good {
            CalibrationPhase::FinalWindow
        } else {
            CalibrationPhase::Monitoring
        };
        assert_eq!(output.phase, expected);
    }
}

#[test]
fn two_held_contacts_with_touch_area_pass_confirmation() {
    let mut engine = engine();
    area(&mut engine, 0, (12, 10, 2), 1);
    engine.on_contact(contact(0, ObservationKind::Press, 100, 100, 10), 1);
    engine.on_contact(contact(1, ObservationKind::Press, 300, 300, 10), 2);
    engine.service_deadline(1_000);
    area(&mut engine, 2_000, (5, 20, 3), 2);

    let output = engine.service_deadline(4_000);
    assert!(output.actions.is_empty());
    assert_eq!(output.phase, CalibrationPhase::FinalWindow);
}

#[test]
fn final_window_recalibrates_when_anti_touch_dominates() {
    let mut engine = engine();
    into_final(&mut engine);
    area(&mut engine, 5_000, (10, 5, 8), 1);

    let output = engine.service_deadline(9_000);
    assert!(output.actions.contains_recalibrate());
    assert_eq!(output.phase, CalibrationPhase::Monitoring);
}

#[test]
fn stationary_light_contact_enables_auto_calibration() {
    let mut engine = engine();
    for step in 0..7 {
        let output = area(&mut engine, step * 100, (10, 3, 0), 1);
        assert_eq!(output.actions.auto_calibration(), None);
    }
    let output = area(&mut engine, 700, (10, 3, 0), 1);
    assert_eq!(output.actions.auto_calibration(), Some(5));
    assert!(engine.coincidence_suspected());

    // Auto-calibration active: the first window restarts instead of closing.
    let restart = engine.service_deadline(1_000);
    assert_eq!(restart.actions.auto_calibration(), Some(0));
    assert_eq!(restart.phase, CalibrationPhase::FirstWindow);
    assert_eq!(engine.deadline(), Some(2_000));
    assert!(!engine.coincidence_suspected());

    let closed = engine.service_deadline(2_000);
    assert_eq!(closed.phase, CalibrationPhase::ConfirmationWindow);
}

#[test]
fn moving_contact_never_suspects_coincidence() {
    let mut engine = engine();
    engine.on_contact(contact(0, ObservationKind::Press, 100, 100, 5), 1);
    for step in 0..10u16 {
        engine.on_contact(
            contact(0, ObservationKind::Move, 100 + step * 20, 100, 5),
            1,
        );
        let output = area(&mut engine, u64::from(step) * 50, (10, 3, 0), 1);
        assert_eq!(output.actions.auto_calibration(), None);
    }
    assert!(!engine.coincidence_suspected());
}

#[test]
fn palm_streak_recalibrates_on_sixth_report() {
    let mut engine = engine();
    for step in 0..5 {
        let output = area(&mut engine, step * 10, (4, 3, 0), 5);
        assert!(!output.actions.contains_recalibrate());
    }
    let output = area(&mut engine, 50, (4, 3, 0), 5);
    assert!(output.actions.contains_recalibrate());
}

#[test]
fn shape_checks_by_contact_count() {
    // Two contacts, touch well below anti-touch.
    let mut engine = engine();
    assert!(area(&mut engine, 0, (20, 4, 10), 2)
        .actions
        .contains_recalibrate());

    // Single contact with a very large touch area.
    let mut engine = self::engine();
    assert!(area(&mut engine, 0, (40, 30, 0), 1)
        .actions
        .contains_recalibrate());

    // Several contacts with a large touch area above anti-touch.
    let mut engine = self::engine();
    assert!(area(&mut engine, 0, (60, 50, 10), 3)
        .actions
        .contains_recalibrate());

    // Several contacts, mid touch area, anti-touch dominating.
    let mut engine = self::engine();
    assert!(area(&mut engine, 0, (60, 30, 40), 3)
        .actions
        .contains_recalibrate());

    // Plausible two finger touch.
    let mut engine = self::engine();
    assert!(area(&mut engine, 0, (30, 20, 5), 2).actions.is_empty());
}

#[test]
fn stationary_contact_recalibrates_once_pattern_tracking_is_armed() {
    let mut engine = engine();
    into_final(&mut engine);
    engine.service_deadline(9_000);
    assert_eq!(engine.phase(), CalibrationPhase::Settled);

    area(&mut engine, 10_000, (20, 10, 10), 1);
    assert!(engine
        .on_contact(contact(0, ObservationKind::Press, 100, 100, 8), 1)
        .actions
        .is_empty());
    for _ in 0..3 {
        let output = engine.on_contact(contact(0, ObservationKind::Move, 101, 100, 8), 1);
        assert!(output.actions.is_empty());
    }
    let output = engine.on_contact(contact(0, ObservationKind::Move, 101, 101, 8), 1);
    assert!(output.actions.contains_recalibrate());
    assert!(!engine.pattern_tracking());
}

#[test]
fn pattern_tracking_is_idle_before_confirmation() {
    let mut engine = engine();
    area(&mut engine, 0, (20, 10, 10), 1);
    engine.on_contact(contact(0, ObservationKind::Press, 100, 100, 8), 1);
    for _ in 0..10 {
        let output = engine.on_contact(contact(0, ObservationKind::Move, 100, 100, 8), 1);
        assert!(!output.actions.contains_recalibrate());
    }
}

#[test]
fn calibration_start_restarts_checks() {
    let mut engine = engine();
    into_final(&mut engine);
    engine.service_deadline(9_000);

    let output = engine.on_calibration_started();
    assert_eq!(output.actions.auto_calibration(), Some(0));
    assert_eq!(output.phase, CalibrationPhase::Monitoring);
    assert!(engine.is_busy());
    assert!(!engine.pattern_tracking());
    assert_eq!(engine.deadline(), None);

    // Requests are absorbed until the device is back in normal mode.
    assert!(area(&mut engine, 10_000, (5, 0, 5), 0).actions.is_empty());
    engine.on_normal_mode();
    assert!(area(&mut engine, 10_100, (5, 0, 5), 0)
        .actions
        .contains_recalibrate());
}

#[test]
fn device_reset_reinitializes_engine() {
    let mut engine = engine();
    area(&mut engine, 0, (12, 10, 2), 1);
    engine.request_recalibration("test");
    assert_eq!(engine.phase(), CalibrationPhase::FirstWindow);

    engine.on_device_reset();
    assert_eq!(engine.phase(), CalibrationPhase::Monitoring);
    assert_eq!(engine.deadline(), None);
    assert!(!engine.is_busy());
    assert_eq!(engine.metrics(), AreaMetrics::default());
    assert!(engine.service_deadline(1_000).actions.is_empty());
}

#[test]
fn area_payload_decodes_little_endian_sums() {
    let metrics = AreaMetrics::from_payload(&[0x34, 0x12, 0x0A, 0x00, 0x00, 0x01, 0, 0]);
    assert_eq!(metrics, AreaMetrics::new(0x1234, 10, 0x0100));
    assert!(!metrics.is_quiet());
}

#[test]
fn anti_touch_trigger_fires_in_every_phase() {
    let drivers: [fn(&mut CalibrationEngine); 5] = [
        |_| {},
        |engine| {
            area(engine, 0, (12, 10, 2), 1);
        },
        into_confirmation,
        into_final,
        |engine| {
            into_final(engine);
            engine.service_deadline(9_000);
        },
    ];
    let expected = [
        CalibrationPhase::Monitoring,
        CalibrationPhase::FirstWindow,
        CalibrationPhase::ConfirmationWindow,
        CalibrationPhase::FinalWindow,
        CalibrationPhase::Settled,
    ];

    for (drive, phase) in drivers.into_iter().zip(expected) {
        let mut engine = engine();
        drive(&mut engine);
        assert_eq!(engine.phase(), phase);
        let output = area(&mut engine, 9_500, (5, 0, 5), 0);
        assert_eq!(output.actions.recalibrations(), 1, "phase {phase:?}");
    }
}

#[test]
fn failed_calibrate_command_reopens_requests() {
    let mut engine = engine();
    assert!(engine.request_recalibration("test").actions.contains_recalibrate());
    assert!(engine.is_busy());

    engine.on_calibrate_failed();
    assert!(!engine.is_busy());
    assert_eq!(area(&mut engine, 0, (5, 0, 5), 0).actions.recalibrations(), 1);
}
