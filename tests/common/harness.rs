use std::sync::Arc;

use pacebeat::catalog::{CatalogService, Track};
use pacebeat::config::{MatchingSettings, ReconcilerSettings, TrackingPreferences};
use pacebeat::playback::{PlaybackEngine, PlayerState};
use pacebeat::reconciler::{QueueReconciler, QueueSnapshot, ReconcilerHandle};
use pacebeat::tempo::TempoMode;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::constants::{TRACK_DURATION_MS, WAIT_TIMEOUT};

pub fn track(uri: &str) -> Track {
    Track {
        uri: uri.to_string(),
        name: format!("Song {}", uri),
        artist: "Band".to_string(),
        duration_secs: TRACK_DURATION_MS / 1000,
        artwork_url: "https://img/cover".to_string(),
        tempo: None,
    }
}

pub fn player_state(uri: &str, position_ms: u64, is_paused: bool) -> PlayerState {
    PlayerState {
        track_uri: uri.to_string(),
        track_name: format!("Song {}", uri),
        artist_name: "Band".to_string(),
        duration_ms: TRACK_DURATION_MS,
        position_ms,
        is_paused,
    }
}

/// A running reconciler wired to test collaborators. Shuts down on drop.
pub struct TestReconciler<C, E> {
    pub handle: ReconcilerHandle,
    pub catalog: Arc<C>,
    pub engine: Arc<E>,
    pub preferences: watch::Sender<TrackingPreferences>,
    pub shutdown: CancellationToken,
}

impl<C, E> TestReconciler<C, E>
where
    C: CatalogService + 'static,
    E: PlaybackEngine + 'static,
{
    pub fn spawn(catalog: C, engine: E, mode: TempoMode, lookahead: usize) -> Self {
        let catalog = Arc::new(catalog);
        let engine = Arc::new(engine);
        let (preferences, preferences_rx) = watch::channel(TrackingPreferences {
            mode,
            genre_seeds: vec!["work-out".to_string()],
        });
        let settings = ReconcilerSettings {
            lookahead,
            ..Default::default()
        };
        let shutdown = CancellationToken::new();

        let (handle, _task) = QueueReconciler::spawn(
            catalog.clone(),
            engine.clone(),
            preferences_rx,
            MatchingSettings::default(),
            &settings,
            shutdown.clone(),
        );

        Self {
            handle,
            catalog,
            engine,
            preferences,
            shutdown,
        }
    }

    pub fn dynamic(catalog: C, engine: E) -> Self {
        Self::spawn(catalog, engine, TempoMode::Dynamic, 1)
    }

    pub fn manual(catalog: C, engine: E, bpm: f64) -> Self {
        Self::spawn(catalog, engine, TempoMode::Manual { bpm }, 1)
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.handle.snapshot().await.unwrap()
    }

    /// Wait until no fetch is in flight.
    pub async fn settled(&self) -> QueueSnapshot {
        wait_for(&self.handle, |s| !s.fetch_in_flight).await
    }
}

impl<C, E> Drop for TestReconciler<C, E> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll snapshots until `condition` holds, panicking after a few seconds.
pub async fn wait_for<F>(handle: &ReconcilerHandle, condition: F) -> QueueSnapshot
where
    F: Fn(&QueueSnapshot) -> bool,
{
    let poll = async {
        loop {
            let snapshot = handle.snapshot().await.unwrap();
            if condition(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(WAIT_TIMEOUT, poll)
        .await
        .expect("Condition not reached in time")
}
