//! End-to-end scan scenarios against mock hardware.

mod common;

use common::{after_point, assert_duration_near, calibrated_rig, grid_121, Action, RigBuilder, TimingTolerance, AMBIENT, HEIGHT, WIDTH};
use std::time::Duration;
use thermal_inspect::detection::DefectKind;
use thermal_inspect::error::{InspectError, RejectReason};
use thermal_inspect::hardware::mock::{SceneAnomaly, SensorFault};
use thermal_inspect::scan::{ScanBounds, ScanJob, ScanOutcome, ScanPattern, ScanPoint};
use thermal_inspect::supervisor::SystemState;
use thermal_inspect::telemetry::TelemetryEvent;
use tokio::time::Instant;

/// 3x3 block centered in the frame, visible only from `at`.
fn hot_block(delta: f64, at: ScanPoint) -> SceneAnomaly {
    SceneAnomaly::block(WIDTH / 2 - 1, HEIGHT / 2 - 1, 3, 3, delta).seen_at(at)
}

#[tokio::test(start_paused = true)]
async fn test_grid_scan_finds_and_escalates_hot_spot() {
    let mut rig = calibrated_rig(
        RigBuilder::new().sensor(|s| s.with_anomaly(hot_block(15.0, ScanPoint::new(0.0, 0.0)))),
    )
    .await;

    let report = rig.supervisor.request_scan(grid_121()).await.unwrap();

    assert_eq!(report.outcome, ScanOutcome::Completed);
    assert_eq!(report.total_points, 121);
    assert_eq!(report.completed_points(), 121);
    assert_eq!(report.capture_failures, 0);
    assert_eq!(rig.supervisor.current_state(), SystemState::Idle);
    assert_eq!(rig.supervisor.progress(), 1.0);

    let defects = rig.supervisor.last_defects();
    assert!(!defects.is_empty());
    assert!(defects
        .iter()
        .all(|d| d.position == Some(ScanPoint::new(0.0, 0.0))));

    // +15 °C over a 2 °C threshold is severity 7.5, well past critical
    let critical: Vec<_> = defects
        .iter()
        .filter(|d| d.kind == DefectKind::CriticalHotSpot)
        .collect();
    assert_eq!(critical.len(), 9);
    assert!(critical.iter().all(|d| (d.severity - 7.5).abs() < 1e-9));
    assert!(critical.iter().all(|d| d.area == 9));
    assert!(defects.iter().all(|d| d.kind != DefectKind::HotSpot));

    // the report carries the same relabelled defects
    assert_eq!(report.defects().cloned().collect::<Vec<_>>(), defects.to_vec());

    // every other point saw a clean frame at ambient
    for point in report.points.iter().filter(|p| p.actual != ScanPoint::new(0.0, 0.0)) {
        assert!(point.defects.is_empty());
        let stats = point.frame_stats.unwrap();
        assert!((stats.mean - AMBIENT).abs() < 1e-9);
    }
}

#[tokio::test(start_paused = true)]
async fn test_scan_lifecycle_and_telemetry() {
    let mut rig = calibrated_rig(
        RigBuilder::new().sensor(|s| s.with_anomaly(hot_block(15.0, ScanPoint::new(10.0, -5.0)))),
    )
    .await;

    let report = rig.supervisor.request_scan(grid_121()).await.unwrap();

    let progress = rig.telemetry.progress_counts();
    assert_eq!(progress, (1..=121).collect::<Vec<_>>());

    let states = rig.telemetry.states_entered();
    let scan_states = &states[states.len() - 4..];
    assert_eq!(
        scan_states,
        [
            SystemState::Scanning,
            SystemState::Analyzing,
            SystemState::Reporting,
            SystemState::Idle
        ]
    );

    let summary = rig
        .telemetry
        .events()
        .into_iter()
        .find_map(|e| match e {
            TelemetryEvent::DefectSummary { run_uid, summary } => Some((run_uid, summary)),
            _ => None,
        })
        .expect("summary published");
    assert_eq!(summary.0, report.run_uid);
    assert_eq!(summary.1.count(DefectKind::CriticalHotSpot), 9);
    assert_eq!(summary.1.total, rig.supervisor.last_defects().len());
}

#[tokio::test(start_paused = true)]
async fn test_scan_duration_is_settle_bound() {
    let mut rig = calibrated_rig(RigBuilder::new()).await;

    let started = Instant::now();
    rig.supervisor.request_scan(grid_121()).await.unwrap();
    assert_duration_near(
        started.elapsed(),
        Duration::from_millis(121 * 20),
        TimingTolerance::Tight,
        "121 points at 20 ms settle",
    );
}

#[tokio::test(start_paused = true)]
async fn test_emergency_mid_scan_halts_before_next_point() {
    let mut rig = calibrated_rig(RigBuilder::new().on_event(after_point(60), Action::Emergency)).await;
    let reads_before = rig.sensor.read_count().await;

    let report = rig.supervisor.request_scan(grid_121()).await.unwrap();

    assert_eq!(report.outcome, ScanOutcome::EmergencyStopped);
    assert_eq!(report.completed_points(), 60);
    assert_eq!(rig.stage.move_count().await, 60);
    assert_eq!(rig.sensor.read_count().await, reads_before + 60);
    assert_eq!(rig.supervisor.current_state(), SystemState::EmergencyStopped);
    assert!(rig.supervisor.last_report().is_some());

    // latched until explicitly reset
    let err = rig.supervisor.request_scan(grid_121()).await.unwrap_err();
    assert!(matches!(
        err,
        InspectError::Rejected(RejectReason::EmergencyLatched)
    ));
    assert_eq!(rig.stage.move_count().await, 60);

    rig.supervisor.reset_emergency().unwrap();
    assert_eq!(rig.supervisor.current_state(), SystemState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_via_handle_before_scan() {
    let mut rig = calibrated_rig(RigBuilder::new()).await;
    rig.supervisor.handle().emergency_stop();

    let err = rig.supervisor.request_scan(grid_121()).await.unwrap_err();
    assert!(matches!(
        err,
        InspectError::Rejected(RejectReason::EmergencyLatched)
    ));
    assert_eq!(rig.stage.move_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_returns_to_idle_with_partial_report() {
    let mut rig = calibrated_rig(RigBuilder::new().on_event(after_point(10), Action::Abort)).await;

    let report = rig.supervisor.request_scan(grid_121()).await.unwrap();
    assert_eq!(report.outcome, ScanOutcome::Aborted);
    assert_eq!(report.completed_points(), 10);
    assert_eq!(rig.supervisor.current_state(), SystemState::Idle);
    assert!(!rig.interlock.abort_requested());
}

#[tokio::test(start_paused = true)]
async fn test_capture_failures_skip_points() {
    let mut rig = calibrated_rig(RigBuilder::new()).await;
    // first point: timeout then bus error exhausts the retry budget
    rig.sensor
        .inject_faults([SensorFault::Hang, SensorFault::CommError])
        .await;

    let report = rig.supervisor.request_scan(grid_121()).await.unwrap();
    assert_eq!(report.outcome, ScanOutcome::Completed);
    assert_eq!(report.capture_failures, 1);
    assert_eq!(report.completed_points(), 121);
    assert!(report.points[0].capture_error.is_some());
    assert_eq!(rig.supervisor.current_state(), SystemState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_single_transient_failure_is_retried() {
    let mut rig = calibrated_rig(RigBuilder::new()).await;
    rig.sensor.inject_faults([SensorFault::CommError]).await;

    let report = rig.supervisor.request_scan(grid_121()).await.unwrap();
    assert_eq!(report.capture_failures, 0);
    assert!(report.points.iter().all(|p| p.frame_stats.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_capacity_bound_per_frame() {
    let mut rig = calibrated_rig(
        RigBuilder::new()
            .config(|c| c.detection.capacity = 5)
            .sensor(|s| s.with_anomaly(SceneAnomaly::block(8, 6, 12, 10, 9.0))),
    )
    .await;

    let job = ScanJob::new(ScanPattern::SinglePoint, ScanBounds::centered(10.0), 1.0);
    let report = rig.supervisor.request_scan(job).await.unwrap();

    let point = &report.points[0];
    assert_eq!(point.defects.len(), 5);
    assert!(point.dropped_defects > 0);
    assert_eq!(report.dropped_defects(), point.dropped_defects);
    assert_eq!(rig.supervisor.last_defects().len(), 5);
    assert_eq!(rig.supervisor.current_state(), SystemState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_deferred_analysis_matches_realtime() {
    let mut rig = calibrated_rig(
        RigBuilder::new().sensor(|s| s.with_anomaly(hot_block(-6.0, ScanPoint::new(5.0, 5.0)))),
    )
    .await;

    let realtime = rig.supervisor.request_scan(grid_121()).await.unwrap();
    let realtime_defects = rig.supervisor.last_defects().to_vec();

    let deferred = rig
        .supervisor
        .request_scan(grid_121().with_realtime_analysis(false))
        .await
        .unwrap();

    assert!(deferred.points.iter().all(|p| p.analyzed && p.frame.is_none()));
    assert_eq!(rig.supervisor.last_defects(), realtime_defects.as_slice());
    assert_eq!(
        realtime.defects().count(),
        deferred.defects().count()
    );
    assert!(realtime_defects
        .iter()
        .any(|d| d.kind == DefectKind::ColdSpot));
}

#[tokio::test(start_paused = true)]
async fn test_spiral_stays_inside_area_and_saves_frames() {
    let mut rig = calibrated_rig(RigBuilder::new()).await;
    let job = ScanJob::new(ScanPattern::Spiral, ScanBounds::centered(20.0), 4.0).with_save_frames(true);

    let report = rig.supervisor.request_scan(job).await.unwrap();

    let moves = rig.stage.moves().await;
    assert_eq!(moves.len(), report.total_points);
    assert!(moves
        .iter()
        .all(|(x, y)| (x * x + y * y).sqrt() <= 20.0 + 1e-9));
    assert_eq!(rig.sink.saved().await.len(), report.total_points);
    assert!(report.points.iter().all(|p| p.saved));
}

#[tokio::test(start_paused = true)]
async fn test_save_failures_are_not_fatal() {
    let mut rig = calibrated_rig(RigBuilder::new()).await;
    rig.sink.set_failing(true).await;

    let report = rig
        .supervisor
        .request_scan(grid_121().with_save_frames(true))
        .await
        .unwrap();
    assert_eq!(report.outcome, ScanOutcome::Completed);
    assert_eq!(report.save_failures, 121);
    assert_eq!(rig.supervisor.current_state(), SystemState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_targets_clamped_to_envelope() {
    let mut rig = calibrated_rig(RigBuilder::new().config(|c| {
        c.motion.envelope.x_max = 10.0;
    }))
    .await;

    let report = rig.supervisor.request_scan(grid_121()).await.unwrap();
    assert_eq!(report.outcome, ScanOutcome::Completed);
    assert!(rig.stage.moves().await.iter().all(|(x, _)| *x <= 10.0));
    let clamped = report
        .points
        .iter()
        .filter(|p| p.requested != p.actual)
        .count();
    // three columns (15, 20, 25 mm) on each of 11 rows
    assert_eq!(clamped, 33);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_job_rejected_without_leaving_idle() {
    let mut rig = calibrated_rig(RigBuilder::new()).await;
    let job = ScanJob::grid(ScanBounds::centered(25.0), -1.0);

    let err = rig.supervisor.request_scan(job).await.unwrap_err();
    assert!(matches!(
        err,
        InspectError::Rejected(RejectReason::InvalidRequest(_))
    ));
    assert_eq!(rig.supervisor.current_state(), SystemState::Idle);
    assert_eq!(rig.stage.move_count().await, 0);
}
