//! End-to-end tests for the tracking session lifecycle
//!
//! Cadence source -> sampler -> reconciler, plus the foreground ticker and
//! the bounded background window.

mod common;

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use common::{
    track, wait_for, FailingCadenceSource, FakeCatalog, FakePlaybackEngine, TestReconciler,
    TRACK_A, WAIT_TIMEOUT,
};
use pacebeat::background::SimulatedHost;
use pacebeat::cadence::{CadenceError, CadenceSource, ScriptedCadenceSource, SmoothedCadence};
use pacebeat::config::{BackgroundSettings, ReconcilerSettings};
use pacebeat::reconciler::{ReconcilerHandle, RefillDecision, RunState};
use pacebeat::session::{SessionError, TrackingSession};
use pacebeat::tempo::TempoTarget;

fn session_with(
    source: Arc<dyn CadenceSource>,
    reconciler: &ReconcilerHandle,
    host: Arc<SimulatedHost>,
) -> TrackingSession {
    TrackingSession::new(
        source,
        reconciler.clone(),
        host,
        ReconcilerSettings::default(),
        BackgroundSettings::default(),
    )
}

async fn wait_idle(reconciler: &ReconcilerHandle) {
    let mut run_state = reconciler.subscribe_run_state();
    tokio::time::timeout(WAIT_TIMEOUT, run_state.wait_for(|s| *s == RunState::Idle))
        .await
        .expect("Reconciler did not go idle")
        .unwrap();
}

#[tokio::test]
async fn test_cadence_drives_first_fetch() {
    let harness = TestReconciler::dynamic(
        FakeCatalog::returning(vec![track(TRACK_A)]),
        FakePlaybackEngine::new(),
    );
    let source = Arc::new(ScriptedCadenceSource::new(
        vec![2.6, 2.7],
        Duration::from_millis(20),
    ));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source, &harness.handle, host);

    session.start_tracking().await.unwrap();
    assert!(session.is_tracking().await);

    let snapshot = wait_for(&harness.handle, |s| s.stats.appended == 1).await;
    assert_eq!(snapshot.run_state, RunState::Tracking);
    assert_eq!(snapshot.queue[0].uri, TRACK_A);

    // First reading: 2.6 steps/sec is 156 steps/min.
    let queries = harness.catalog.queries();
    assert_relative_eq!(queries[0].min_tempo, 154.5);
    assert_relative_eq!(queries[0].max_tempo, 158.0);
    assert!(session.cadence().borrow().steps_per_min() > 0.0);

    session.stop_tracking().await.unwrap();
    assert!(!session.is_tracking().await);
    assert_eq!(harness.handle.run_state(), RunState::Idle);
}

#[tokio::test]
async fn test_start_is_idempotent_and_restartable() {
    let harness = TestReconciler::manual(
        FakeCatalog::returning(vec![]),
        FakePlaybackEngine::new(),
        160.0,
    );
    let source = Arc::new(ScriptedCadenceSource::new(
        vec![2.8],
        Duration::from_millis(50),
    ));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source, &harness.handle, host);

    session.start_tracking().await.unwrap();
    session.start_tracking().await.unwrap();
    assert!(session.is_tracking().await);

    session.stop_tracking().await.unwrap();
    session.stop_tracking().await.unwrap();
    assert!(!session.is_tracking().await);
    assert_eq!(harness.handle.run_state(), RunState::Idle);

    session.start_tracking().await.unwrap();
    assert!(session.is_tracking().await);
    assert_eq!(harness.handle.run_state(), RunState::Tracking);
    session.stop_tracking().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_restart_does_not_fetch_for_previous_cadence() {
    let harness = TestReconciler::dynamic(FakeCatalog::returning(vec![]), FakePlaybackEngine::new());
    // A single reading at the start of each run, then silence.
    let source = Arc::new(ScriptedCadenceSource::new(vec![2.5], Duration::from_secs(3600)));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source, &harness.handle, host);

    session.start_tracking().await.unwrap();
    wait_for(&harness.handle, |s| s.stats.empty_results == 1).await;
    session.stop_tracking().await.unwrap();
    assert_eq!(harness.snapshot().await.cadence, SmoothedCadence::ZERO);

    // Nothing has been read yet in the new run.
    session.start_tracking().await.unwrap();
    let snapshot = harness.snapshot().await;
    assert_eq!(snapshot.stats.attempts, 1);
    assert_eq!(snapshot.last_decision, Some(RefillDecision::AwaitingCadence));

    let snapshot = wait_for(&harness.handle, |s| s.stats.empty_results == 2).await;
    assert_eq!(snapshot.stats.attempts, 2);
    session.stop_tracking().await.unwrap();
}

#[tokio::test]
async fn test_unavailable_source_refuses_to_start() {
    let harness = TestReconciler::dynamic(FakeCatalog::returning(vec![]), FakePlaybackEngine::new());
    let source = Arc::new(ScriptedCadenceSource::new(vec![], Duration::from_secs(1)));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source, &harness.handle, host);

    let result = session.start_tracking().await;
    assert!(matches!(result, Err(SessionError::CadenceUnavailable)));
    assert!(!session.is_tracking().await);
    assert_eq!(harness.handle.run_state(), RunState::Idle);
}

#[tokio::test]
async fn test_source_failure_stops_tracking() {
    let harness = TestReconciler::dynamic(FakeCatalog::returning(vec![]), FakePlaybackEngine::new());
    let source = Arc::new(FailingCadenceSource::new(
        vec![2.5],
        Some(CadenceError::SourceFailed("sensor lost".to_string())),
    ));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source.clone(), &harness.handle, host);

    session.start_tracking().await.unwrap();
    wait_idle(&harness.handle).await;

    assert!(!session.is_tracking().await);
    assert_eq!(source.stop_count(), 1);

    // The reading before the failure still reached the reconciler, which
    // forgot it again on stop.
    let snapshot = harness.snapshot().await;
    assert_eq!(snapshot.last_target, Some(TempoTarget::new(150.0)));
    assert_eq!(snapshot.cadence, SmoothedCadence::ZERO);
}

#[tokio::test]
async fn test_source_end_stops_tracking() {
    let harness = TestReconciler::dynamic(FakeCatalog::returning(vec![]), FakePlaybackEngine::new());
    let source = Arc::new(FailingCadenceSource::new(vec![2.5, 2.6], None));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source.clone(), &harness.handle, host);

    session.start_tracking().await.unwrap();
    wait_idle(&harness.handle).await;

    assert!(!session.is_tracking().await);
    assert_eq!(source.stop_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_window_ends_at_elapsed_cap() {
    let harness = TestReconciler::manual(
        FakeCatalog::returning(vec![]),
        FakePlaybackEngine::new(),
        160.0,
    );
    let source = Arc::new(ScriptedCadenceSource::new(vec![2.7], Duration::from_secs(1)));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source, &harness.handle, host.clone());

    session.start_tracking().await.unwrap();
    session.enter_background().await.unwrap();
    assert!(session.is_in_background().await);
    assert_eq!(host.grant_count(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(session.is_tracking().await);
    let calls_midway = harness.catalog.calls();
    assert!(calls_midway > 1, "background ticks keep fetching");

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!session.is_tracking().await);
    assert!(!host.is_held());
    assert_eq!(host.release_count(), 1);
    assert_eq!(harness.handle.run_state(), RunState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_background_window_ends_before_allowance_runs_out() {
    let harness = TestReconciler::manual(
        FakeCatalog::returning(vec![]),
        FakePlaybackEngine::new(),
        160.0,
    );
    let source = Arc::new(ScriptedCadenceSource::new(vec![2.7], Duration::from_secs(1)));
    // Less than the elapsed cap: the allowance decides.
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(10)));
    let session = session_with(source, &harness.handle, host.clone());

    session.start_tracking().await.unwrap();
    session.enter_background().await.unwrap();

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert!(session.is_tracking().await);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!session.is_tracking().await);
    assert_eq!(host.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_host_expiry_stops_tracking() {
    let harness = TestReconciler::manual(
        FakeCatalog::returning(vec![]),
        FakePlaybackEngine::new(),
        160.0,
    );
    let source = Arc::new(ScriptedCadenceSource::new(vec![2.7], Duration::from_secs(1)));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source, &harness.handle, host.clone());

    session.start_tracking().await.unwrap();
    session.enter_background().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    host.expire_now();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!session.is_tracking().await);
    assert_eq!(host.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_foreground_return_releases_once_and_keeps_tracking() {
    let harness = TestReconciler::manual(
        FakeCatalog::returning(vec![]),
        FakePlaybackEngine::new(),
        160.0,
    );
    let source = Arc::new(ScriptedCadenceSource::new(vec![2.7], Duration::from_secs(1)));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source, &harness.handle, host.clone());

    session.start_tracking().await.unwrap();
    session.enter_background().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    session.enter_foreground().await;
    assert!(!session.is_in_background().await);
    assert!(!host.is_held());
    assert_eq!(host.release_count(), 1);

    // Past where the window would have ended: still tracking, no second
    // release, and the foreground ticker is back.
    let calls_before = harness.catalog.calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(session.is_tracking().await);
    assert_eq!(host.release_count(), 1);
    assert!(harness.catalog.calls() > calls_before);

    session.stop_tracking().await.unwrap();
    assert_eq!(host.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_denied_background_time_stops_immediately() {
    let harness = TestReconciler::manual(
        FakeCatalog::returning(vec![]),
        FakePlaybackEngine::new(),
        160.0,
    );
    let source = Arc::new(ScriptedCadenceSource::new(vec![2.7], Duration::from_secs(1)));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    host.set_deny(true);
    let session = session_with(source, &harness.handle, host.clone());

    session.start_tracking().await.unwrap();
    session.enter_background().await.unwrap();

    assert!(!session.is_tracking().await);
    assert_eq!(host.grant_count(), 0);
    assert_eq!(host.release_count(), 0);
    assert_eq!(harness.handle.run_state(), RunState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_background_while_idle_requests_nothing() {
    let harness = TestReconciler::dynamic(FakeCatalog::returning(vec![]), FakePlaybackEngine::new());
    let source = Arc::new(ScriptedCadenceSource::new(vec![2.7], Duration::from_secs(1)));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source, &harness.handle, host.clone());

    session.enter_background().await.unwrap();
    assert!(session.is_in_background().await);
    assert_eq!(host.grant_count(), 0);

    session.enter_foreground().await;
    assert!(!session.is_in_background().await);
    assert_eq!(host.release_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_backgrounded_is_time_bounded() {
    let harness = TestReconciler::manual(
        FakeCatalog::returning(vec![]),
        FakePlaybackEngine::new(),
        160.0,
    );
    let source = Arc::new(ScriptedCadenceSource::new(vec![2.7], Duration::from_secs(1)));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source, &harness.handle, host.clone());

    session.enter_background().await.unwrap();
    session.start_tracking().await.unwrap();
    assert!(session.is_tracking().await);
    assert!(host.is_held());
    assert_eq!(host.grant_count(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!session.is_tracking().await);
    assert!(!host.is_held());
    assert_eq!(host.release_count(), 1);
    assert_eq!(harness.handle.run_state(), RunState::Idle);

    // No work after the window closed.
    let calls_after = harness.catalog.calls();
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(harness.catalog.calls(), calls_after);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_backgrounded_without_grant_stops() {
    let harness = TestReconciler::manual(
        FakeCatalog::returning(vec![]),
        FakePlaybackEngine::new(),
        160.0,
    );
    let source = Arc::new(ScriptedCadenceSource::new(vec![2.7], Duration::from_secs(1)));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    host.set_deny(true);
    let session = session_with(source, &harness.handle, host.clone());

    session.enter_background().await.unwrap();
    session.start_tracking().await.unwrap();

    assert!(!session.is_tracking().await);
    assert_eq!(host.grant_count(), 0);
    assert_eq!(harness.handle.run_state(), RunState::Idle);
}

#[tokio::test]
async fn test_stop_after_reconciler_shutdown_succeeds() {
    let harness = TestReconciler::manual(
        FakeCatalog::returning(vec![]),
        FakePlaybackEngine::new(),
        160.0,
    );
    let source = Arc::new(ScriptedCadenceSource::new(vec![2.7], Duration::from_millis(50)));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(30)));
    let session = session_with(source, &harness.handle, host);

    session.start_tracking().await.unwrap();
    harness.shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(harness.handle.snapshot().await.is_err());

    session.stop_tracking().await.unwrap();
    assert!(!session.is_tracking().await);
}
