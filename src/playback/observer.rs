use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PlaybackEngine, PlayerEvent, PlayerState};
use crate::catalog::AudioFeatureService;
use crate::reconciler::ReconcilerHandle;

const ALERT_BUFFER: usize = 16;

/// What the presentation layer shows for the current track.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub uri: String,
    pub name: String,
    pub artist: String,
    pub duration_secs: u64,
    pub is_playing: bool,
    /// Measured tempo, filled in asynchronously. Display only.
    pub tempo: Option<f64>,
}

/// One-shot user-facing notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    ConnectionFailed(String),
    Disconnected(String),
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::ConnectionFailed(reason) => write!(f, "Connection failed: {}", reason),
            Alert::Disconnected(reason) => write!(f, "Disconnected: {}", reason),
        }
    }
}

/// Listens to playback engine events, keeps [`NowPlaying`] up to date and
/// feeds player states to the reconciler.
pub struct PlaybackObserver {
    now_playing: watch::Receiver<Option<NowPlaying>>,
    alerts: broadcast::Sender<Alert>,
    task: JoinHandle<()>,
}

impl PlaybackObserver {
    pub fn spawn(
        engine: Arc<dyn PlaybackEngine>,
        features: Arc<dyn AudioFeatureService>,
        reconciler: ReconcilerHandle,
        shutdown: CancellationToken,
    ) -> Self {
        let (now_playing_tx, now_playing) = watch::channel(None);
        let (alerts, _) = broadcast::channel(ALERT_BUFFER);

        // Subscribe before spawning so no event is missed.
        let events = engine.subscribe();
        let worker = ObserverLoop {
            engine,
            features,
            reconciler,
            now_playing: Arc::new(now_playing_tx),
            alerts: alerts.clone(),
        };
        let task = tokio::spawn(worker.run(events, shutdown));

        Self {
            now_playing,
            alerts,
            task,
        }
    }

    pub fn now_playing(&self) -> watch::Receiver<Option<NowPlaying>> {
        self.now_playing.clone()
    }

    pub fn alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    /// Wait for the observer to stop (shutdown or engine gone).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Playback observer task failed: {}", e);
        }
    }
}

struct ObserverLoop {
    engine: Arc<dyn PlaybackEngine>,
    features: Arc<dyn AudioFeatureService>,
    reconciler: ReconcilerHandle,
    now_playing: Arc<watch::Sender<Option<NowPlaying>>>,
    alerts: broadcast::Sender<Alert>,
}

impl ObserverLoop {
    async fn run(self, mut events: broadcast::Receiver<PlayerEvent>, shutdown: CancellationToken) {
        debug!("Playback observer started");
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(PlayerEvent::Connected) => {
                    info!("Playback engine connected");
                    self.refresh_state().await;
                }
                Ok(PlayerEvent::ConnectionFailed(reason)) => {
                    let reason = reason.unwrap_or_else(|| "unknown error".to_string());
                    warn!("Playback engine connection failed: {}", reason);
                    self.alert(Alert::ConnectionFailed(reason));
                }
                Ok(PlayerEvent::Disconnected(reason)) => {
                    let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                    warn!("Playback engine disconnected: {}", reason);
                    self.alert(Alert::Disconnected(reason));
                }
                Ok(PlayerEvent::StateChanged(state)) => self.on_state(state).await,
                Err(RecvError::Lagged(n)) => {
                    warn!("Playback observer missed {} events, resyncing", n);
                    self.refresh_state().await;
                }
                Err(RecvError::Closed) => {
                    info!("Playback engine event stream closed");
                    break;
                }
            }
        }
        debug!("Playback observer stopped");
    }

    async fn refresh_state(&self) {
        if !self.engine.is_connected() {
            return;
        }
        match self.engine.current_state().await {
            Ok(Some(state)) => self.on_state(state).await,
            Ok(None) => debug!("Engine has nothing loaded"),
            Err(e) => warn!("Failed to fetch player state: {}", e),
        }
    }

    async fn on_state(&self, state: PlayerState) {
        let track_changed = self.publish(&state);
        if track_changed {
            self.lookup_tempo(state.track_uri.clone());
        }

        if let Err(e) = self.reconciler.player_state_changed(state).await {
            warn!("Could not forward player state: {}", e);
        }
    }

    /// Update the display model. Returns whether the track changed.
    fn publish(&self, state: &PlayerState) -> bool {
        let mut track_changed = false;
        self.now_playing.send_modify(|current| {
            let tempo = match current {
                Some(previous) if previous.uri == state.track_uri => previous.tempo,
                _ => {
                    track_changed = true;
                    None
                }
            };
            *current = Some(NowPlaying {
                uri: state.track_uri.clone(),
                name: state.track_name.clone(),
                artist: state.artist_name.clone(),
                duration_secs: state.duration_ms / 1000,
                is_playing: !state.is_paused,
                tempo,
            });
        });
        track_changed
    }

    fn lookup_tempo(&self, uri: String) {
        let features = Arc::clone(&self.features);
        let now_playing = Arc::clone(&self.now_playing);
        tokio::spawn(async move {
            match features.tempo_of(&uri).await {
                Ok(bpm) => {
                    // Drop the result if another track started meanwhile.
                    now_playing.send_if_modified(|current| match current {
                        Some(np) if np.uri == uri => {
                            np.tempo = Some(bpm);
                            true
                        }
                        _ => false,
                    });
                }
                Err(e) => debug!("Tempo lookup for {} failed: {}", uri, e),
            }
        });
    }

    fn alert(&self, alert: Alert) {
        // Nobody listening is fine.
        let _ = self.alerts.send(alert);
    }
}
