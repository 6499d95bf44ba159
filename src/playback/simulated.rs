use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{PlaybackEngine, PlaybackError, PlayerEvent, PlayerState};
use crate::catalog::track_id_from_uri;

const EVENT_BUFFER: usize = 64;

#[derive(Default)]
struct EngineState {
    authorized: bool,
    connected: bool,
    current: Option<PlayerState>,
    previous: Option<String>,
    up_next: VecDeque<String>,
    enqueued: Vec<String>,
}

/// In-memory playback engine.
///
/// Every track lasts `track_length`. Enqueueing while nothing is loaded
/// starts playback immediately, otherwise the track goes to the up-next
/// queue. Time only moves when [`advance`](Self::advance) is called or the
/// autoplay task is running.
pub struct SimulatedPlaybackEngine {
    track_length: Duration,
    state: Mutex<EngineState>,
    events: broadcast::Sender<PlayerEvent>,
    authorizations: AtomicUsize,
    refuse_connections: AtomicBool,
}

impl SimulatedPlaybackEngine {
    pub fn new(track_length: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            track_length,
            state: Mutex::new(EngineState::default()),
            events,
            authorizations: AtomicUsize::new(0),
            refuse_connections: AtomicBool::new(false),
        }
    }

    /// Make subsequent `connect` calls fail.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub fn authorization_count(&self) -> usize {
        self.authorizations.load(Ordering::SeqCst)
    }

    /// Every URI ever enqueued, in order.
    pub fn enqueued(&self) -> Vec<String> {
        self.lock().enqueued.clone()
    }

    pub fn up_next(&self) -> Vec<String> {
        self.lock().up_next.iter().cloned().collect()
    }

    pub fn now_playing(&self) -> Option<PlayerState> {
        self.lock().current.clone()
    }

    /// Drop the connection as if the device went away.
    pub fn disconnect(&self, reason: Option<String>) {
        self.lock().connected = false;
        self.emit(PlayerEvent::Disconnected(reason));
    }

    /// End the current track and move to the next queued one. When nothing
    /// is queued a final "finished" state is reported for the current track.
    pub fn advance(&self) -> Option<PlayerState> {
        let emitted = {
            let mut state = self.lock();
            match state.up_next.pop_front() {
                Some(uri) => {
                    let next = self.fresh_state(&uri);
                    state.previous = state.current.take().map(|s| s.track_uri);
                    state.current = Some(next.clone());
                    Some(next)
                }
                None => state.current.take().map(|mut finished| {
                    finished.position_ms = finished.duration_ms;
                    finished.is_paused = false;
                    state.previous = Some(finished.track_uri.clone());
                    finished
                }),
            }
        };
        if let Some(ref s) = emitted {
            debug!("Simulated engine now at {}", s.track_uri);
            self.emit(PlayerEvent::StateChanged(s.clone()));
        }
        emitted
    }

    pub fn set_paused(&self, paused: bool) {
        let emitted = {
            let mut state = self.lock();
            state.current.as_mut().map(|current| {
                current.is_paused = paused;
                current.clone()
            })
        };
        if let Some(s) = emitted {
            self.emit(PlayerEvent::StateChanged(s));
        }
    }

    /// Advance every `track_length` while not paused, until cancelled.
    pub fn spawn_autoplay(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.track_length);
            ticker.tick().await;
            info!("Simulated autoplay running, {:?} per track", engine.track_length);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let playing = engine.now_playing().map(|s| !s.is_paused).unwrap_or(false);
                if playing {
                    engine.advance();
                }
            }
            debug!("Simulated autoplay stopped");
        })
    }

    fn fresh_state(&self, uri: &str) -> PlayerState {
        PlayerState {
            track_uri: uri.to_string(),
            track_name: track_id_from_uri(uri).to_string(),
            artist_name: String::new(),
            duration_ms: self.track_length.as_millis() as u64,
            position_ms: 0,
            is_paused: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn require_connected(state: &EngineState) -> Result<(), PlaybackError> {
        if state.connected {
            Ok(())
        } else {
            Err(PlaybackError::NotConnected)
        }
    }
}

#[async_trait]
impl PlaybackEngine for SimulatedPlaybackEngine {
    async fn authorize(&self) -> Result<(), PlaybackError> {
        self.authorizations.fetch_add(1, Ordering::SeqCst);
        self.lock().authorized = true;
        Ok(())
    }

    async fn connect(&self) -> Result<(), PlaybackError> {
        if self.refuse_connections.load(Ordering::SeqCst) {
            self.emit(PlayerEvent::ConnectionFailed(Some(
                "connection refused".to_string(),
            )));
            return Err(PlaybackError::Transport("connection refused".to_string()));
        }
        {
            let mut state = self.lock();
            if !state.authorized {
                return Err(PlaybackError::AuthorizationFailed(
                    "not authorized".to_string(),
                ));
            }
            state.connected = true;
        }
        self.emit(PlayerEvent::Connected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn current_state(&self) -> Result<Option<PlayerState>, PlaybackError> {
        let state = self.lock();
        Self::require_connected(&state)?;
        Ok(state.current.clone())
    }

    async fn play(&self, track_uri: &str) -> Result<(), PlaybackError> {
        let started = {
            let mut state = self.lock();
            Self::require_connected(&state)?;
            let next = self.fresh_state(track_uri);
            state.previous = state.current.take().map(|s| s.track_uri);
            state.current = Some(next.clone());
            next
        };
        self.emit(PlayerEvent::StateChanged(started));
        Ok(())
    }

    async fn enqueue(&self, track_uri: &str) -> Result<(), PlaybackError> {
        let started = {
            let mut state = self.lock();
            Self::require_connected(&state)?;
            state.enqueued.push(track_uri.to_string());
            if state.current.is_none() {
                let next = self.fresh_state(track_uri);
                state.current = Some(next.clone());
                Some(next)
            } else {
                state.up_next.push_back(track_uri.to_string());
                None
            }
        };
        if let Some(s) = started {
            self.emit(PlayerEvent::StateChanged(s));
        }
        Ok(())
    }

    async fn resume(&self) -> Result<(), PlaybackError> {
        Self::require_connected(&self.lock())?;
        self.set_paused(false);
        Ok(())
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        Self::require_connected(&self.lock())?;
        self.set_paused(true);
        Ok(())
    }

    async fn skip_next(&self) -> Result<(), PlaybackError> {
        Self::require_connected(&self.lock())?;
        self.advance();
        Ok(())
    }

    async fn skip_previous(&self) -> Result<(), PlaybackError> {
        let restarted = {
            let mut state = self.lock();
            Self::require_connected(&state)?;
            match state.previous.take() {
                Some(previous) => {
                    if let Some(current) = state.current.take() {
                        state.up_next.push_front(current.track_uri);
                    }
                    let s = self.fresh_state(&previous);
                    state.current = Some(s.clone());
                    Some(s)
                }
                None => state.current.as_mut().map(|current| {
                    current.position_ms = 0;
                    current.clone()
                }),
            }
        };
        if let Some(s) = restarted {
            self.emit(PlayerEvent::StateChanged(s));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }
}
