//! Playback engine integration.
//!
//! The engine itself (device connection, audio output, its own queue) lives
//! outside this crate. [`PlaybackEngine`] is the capability surface the sync
//! loop calls, and [`PlaybackObserver`] turns the engine's push events into
//! reconciler input and display state.

mod observer;
mod simulated;

pub use observer::{Alert, NowPlaying, PlaybackObserver};
pub use simulated::SimulatedPlaybackEngine;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

/// Snapshot of what the engine is playing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerState {
    pub track_uri: String,
    pub track_name: String,
    pub artist_name: String,
    pub duration_ms: u64,
    pub position_ms: u64,
    pub is_paused: bool,
}

impl PlayerState {
    /// Playback reached the end of a track with a known length.
    pub fn has_finished(&self) -> bool {
        self.duration_ms > 0 && self.position_ms >= self.duration_ms
    }
}

/// Notifications pushed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Connected,
    ConnectionFailed(Option<String>),
    Disconnected(Option<String>),
    StateChanged(PlayerState),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Playback engine is not connected")]
    NotConnected,

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Playback transport failure: {0}")]
    Transport(String),

    #[error("Nothing is playing")]
    NothingPlaying,
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    async fn authorize(&self) -> Result<(), PlaybackError>;

    async fn connect(&self) -> Result<(), PlaybackError>;

    fn is_connected(&self) -> bool;

    /// `None` when the engine has nothing loaded.
    async fn current_state(&self) -> Result<Option<PlayerState>, PlaybackError>;

    /// Start playing a track right away.
    async fn play(&self, track_uri: &str) -> Result<(), PlaybackError>;

    /// Append a track to the engine's own up-next queue.
    async fn enqueue(&self, track_uri: &str) -> Result<(), PlaybackError>;

    async fn resume(&self) -> Result<(), PlaybackError>;

    async fn pause(&self) -> Result<(), PlaybackError>;

    async fn skip_next(&self) -> Result<(), PlaybackError>;

    async fn skip_previous(&self) -> Result<(), PlaybackError>;

    /// Subscribe to engine events. Events sent before subscribing are not
    /// replayed.
    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent>;
}

/// Authorize and connect if the engine is not connected yet.
pub async fn ensure_connected(engine: &dyn PlaybackEngine) -> Result<(), PlaybackError> {
    if engine.is_connected() {
        return Ok(());
    }
    info!("Playback engine not connected, authorizing");
    engine.authorize().await?;
    engine.connect().await
}

/// Pause if playing, resume if paused. Returns whether playback is running
/// afterwards.
pub async fn toggle_play_pause(engine: &dyn PlaybackEngine) -> Result<bool, PlaybackError> {
    ensure_connected(engine).await?;
    let state = engine
        .current_state()
        .await?
        .ok_or(PlaybackError::NothingPlaying)?;
    if state.is_paused {
        engine.resume().await?;
        Ok(true)
    } else {
        engine.pause().await?;
        Ok(false)
    }
}

pub async fn skip_next(engine: &dyn PlaybackEngine) -> Result<(), PlaybackError> {
    ensure_connected(engine).await?;
    engine.skip_next().await
}

pub async fn skip_previous(engine: &dyn PlaybackEngine) -> Result<(), PlaybackError> {
    ensure_connected(engine).await?;
    engine.skip_previous().await
}
