use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pacebeat::cadence::{CadenceError, CadenceReading, CadenceSource, CadenceStream};
use pacebeat::catalog::{AudioFeatureService, CatalogError, CatalogService, Track};
use pacebeat::playback::{PlaybackEngine, PlaybackError, PlayerEvent, PlayerState};
use pacebeat::tempo::RecommendationQuery;
use tokio::sync::{broadcast, mpsc, Semaphore};

/// Catalog that answers from a script, records every query and tracks how
/// many calls overlap.
pub struct FakeCatalog {
    script: Mutex<VecDeque<Result<Vec<Track>, CatalogError>>>,
    fallback: Vec<Track>,
    queries: Mutex<Vec<RecommendationQuery>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    blocked: AtomicBool,
    release: Semaphore,
    delay: Option<Duration>,
}

impl FakeCatalog {
    /// Always answer with `tracks`.
    pub fn returning(tracks: Vec<Track>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: tracks,
            queries: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            blocked: AtomicBool::new(false),
            release: Semaphore::new(0),
            delay: None,
        }
    }

    /// Answer with the scripted results in order, then with an empty list.
    pub fn scripted(results: Vec<Result<Vec<Track>, CatalogError>>) -> Self {
        let catalog = Self::returning(vec![]);
        *catalog.script.lock().unwrap() = results.into();
        catalog
    }

    /// Calls wait until [`unblock`](Self::unblock) lets them through.
    pub fn blocked(self) -> Self {
        self.blocked.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Let `n` waiting (or future) calls complete.
    pub fn unblock(&self, n: usize) {
        self.release.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<RecommendationQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogService for FakeCatalog {
    async fn recommend(&self, query: &RecommendationQuery) -> Result<Vec<Track>, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.blocked.load(Ordering::SeqCst) {
            self.release.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Audio features keyed by URI; unknown URIs fail.
#[derive(Default)]
pub struct FakeAudioFeatures {
    tempos: HashMap<String, f64>,
}

impl FakeAudioFeatures {
    pub fn with_tempo(mut self, uri: &str, bpm: f64) -> Self {
        self.tempos.insert(uri.to_string(), bpm);
        self
    }
}

#[async_trait]
impl AudioFeatureService for FakeAudioFeatures {
    async fn tempo_of(&self, track_uri: &str) -> Result<f64, CatalogError> {
        self.tempos
            .get(track_uri)
            .copied()
            .ok_or_else(|| CatalogError::Api {
                status: 404,
                message: "unknown track".to_string(),
            })
    }
}

/// Engine that records what the reconciler asks of it and never emits
/// state changes on its own.
pub struct FakePlaybackEngine {
    connected: AtomicBool,
    fail_enqueue: AtomicBool,
    enqueued: Mutex<Vec<String>>,
    connects: AtomicUsize,
    events: broadcast::Sender<PlayerEvent>,
}

impl FakePlaybackEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            connected: AtomicBool::new(false),
            fail_enqueue: AtomicBool::new(false),
            enqueued: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            events,
        }
    }

    pub fn failing_enqueue(self) -> Self {
        self.fail_enqueue.store(true, Ordering::SeqCst);
        self
    }

    pub fn enqueued(&self) -> Vec<String> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackEngine for FakePlaybackEngine {
    async fn authorize(&self) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn connect(&self) -> Result<(), PlaybackError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn current_state(&self) -> Result<Option<PlayerState>, PlaybackError> {
        Ok(None)
    }

    async fn play(&self, _track_uri: &str) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn enqueue(&self, track_uri: &str) -> Result<(), PlaybackError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(PlaybackError::Transport("enqueue rejected".to_string()));
        }
        self.enqueued.lock().unwrap().push(track_uri.to_string());
        Ok(())
    }

    async fn resume(&self) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn skip_next(&self) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn skip_previous(&self) -> Result<(), PlaybackError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }
}

/// Emits the given readings, then fails (or simply ends).
pub struct FailingCadenceSource {
    readings: Vec<f64>,
    error: Option<CadenceError>,
    stops: AtomicUsize,
}

impl FailingCadenceSource {
    pub fn new(readings: Vec<f64>, error: Option<CadenceError>) -> Self {
        Self {
            readings,
            error,
            stops: AtomicUsize::new(0),
        }
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl CadenceSource for FailingCadenceSource {
    fn is_available(&self) -> bool {
        true
    }

    fn start_updates(&self) -> Result<CadenceStream, CadenceError> {
        let (tx, rx) = mpsc::channel(self.readings.len() + 1);
        for value in &self.readings {
            tx.try_send(Ok(CadenceReading::new(*value))).unwrap();
        }
        if let Some(error) = self.error.clone() {
            tx.try_send(Err(error)).unwrap();
        }
        // Dropping the sender ends the stream.
        Ok(rx)
    }

    fn stop_updates(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
