//! Tracking session lifecycle.
//!
//! A [`TrackingSession`] wires a cadence source, the sampler and the
//! reconciler together, and switches between the foreground periodic check
//! and a bounded [`BackgroundWindow`] as the app moves in and out of the
//! foreground.

use std::sync::{Arc, Mutex as StdMutex};

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::background::{BackgroundExecutionHost, BackgroundWindow};
use crate::cadence::{CadenceError, CadenceSampler, CadenceSource, CadenceStream, SmoothedCadence};
use crate::config::{BackgroundSettings, ReconcilerSettings};
use crate::reconciler::{ReconcilerError, ReconcilerHandle};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cadence tracking is not available on this device")]
    CadenceUnavailable,

    #[error(transparent)]
    Cadence(#[from] CadenceError),

    #[error(transparent)]
    Reconciler(#[from] ReconcilerError),
}

#[derive(Default)]
struct SessionState {
    tracking: bool,
    /// Bumped on every start so tasks of an earlier run cannot stop a later one.
    generation: u64,
    in_background: bool,
    ingest: Option<CancellationToken>,
    ticker: Option<CancellationToken>,
    window: Option<Arc<BackgroundWindow>>,
}

struct SessionInner {
    id: Uuid,
    source: Arc<dyn CadenceSource>,
    sampler: StdMutex<CadenceSampler>,
    cadence: watch::Receiver<SmoothedCadence>,
    reconciler: ReconcilerHandle,
    host: Arc<dyn BackgroundExecutionHost>,
    settings: ReconcilerSettings,
    background: BackgroundSettings,
    state: Mutex<SessionState>,
}

/// Cloneable handle to one tracking session.
#[derive(Clone)]
pub struct TrackingSession {
    inner: Arc<SessionInner>,
}

impl TrackingSession {
    pub fn new(
        source: Arc<dyn CadenceSource>,
        reconciler: ReconcilerHandle,
        host: Arc<dyn BackgroundExecutionHost>,
        settings: ReconcilerSettings,
        background: BackgroundSettings,
    ) -> Self {
        let sampler = CadenceSampler::new(settings.smoothing_window);
        let cadence = sampler.subscribe();
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                source,
                sampler: StdMutex::new(sampler),
                cadence,
                reconciler,
                host,
                settings,
                background,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Smoothed cadence updates, for display.
    pub fn cadence(&self) -> watch::Receiver<SmoothedCadence> {
        self.inner.cadence.clone()
    }

    pub fn reconciler(&self) -> &ReconcilerHandle {
        &self.inner.reconciler
    }

    pub async fn is_tracking(&self) -> bool {
        self.inner.state.lock().await.tracking
    }

    pub async fn is_in_background(&self) -> bool {
        self.inner.state.lock().await.in_background
    }

    /// Start reading cadence and keeping the queue filled. No-op if already
    /// tracking.
    pub async fn start_tracking(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if state.tracking {
            return Ok(());
        }
        if !self.inner.source.is_available() {
            warn!("Cadence source unavailable, cannot start tracking");
            return Err(SessionError::CadenceUnavailable);
        }

        let stream = self.inner.source.start_updates()?;
        self.lock_sampler().reset();
        if let Err(e) = self.inner.reconciler.start().await {
            self.inner.source.stop_updates();
            return Err(e.into());
        }

        state.tracking = true;
        state.generation += 1;
        state.ingest = Some(self.spawn_ingest(stream, state.generation));
        info!(session = %self.inner.id, "Tracking started");
        if state.in_background {
            // Started while backgrounded: bounded like any other background run.
            return self.enter_window_locked(&mut state).await;
        }
        state.ticker = Some(self.spawn_ticker());
        Ok(())
    }

    /// Stop tracking. Safe to call when not tracking.
    pub async fn stop_tracking(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        self.stop_locked(&mut state).await
    }

    /// The app left the foreground: keep going only for as long as the host
    /// allows.
    pub async fn enter_background(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if state.in_background {
            return Ok(());
        }
        state.in_background = true;
        if !state.tracking {
            return Ok(());
        }

        if let Some(ticker) = state.ticker.take() {
            ticker.cancel();
        }
        self.enter_window_locked(&mut state).await
    }

    /// Ask the host for background time and run the window, or stop tracking
    /// if none is granted.
    async fn enter_window_locked(&self, state: &mut SessionState) -> Result<(), SessionError> {
        match BackgroundWindow::enter(
            Arc::clone(&self.inner.host),
            self.inner.background.clone(),
        ) {
            Some(window) => {
                let window = Arc::new(window);
                state.window = Some(Arc::clone(&window));
                self.spawn_window(window, state.generation);
                Ok(())
            }
            None => {
                warn!("No background time granted, stopping tracking");
                self.stop_locked(state).await
            }
        }
    }

    /// Back in the foreground: drop the background grant and resume the
    /// periodic check if still tracking.
    pub async fn enter_foreground(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.in_background {
            return;
        }
        state.in_background = false;
        if let Some(window) = state.window.take() {
            window.release();
        }
        if state.tracking && state.ticker.is_none() {
            state.ticker = Some(self.spawn_ticker());
        }
        debug!("Entered foreground");
    }

    /// Stop on behalf of a task started by run `generation`, unless tracking
    /// was restarted since.
    async fn stop_generation(&self, generation: u64) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if state.generation != generation {
            return Ok(());
        }
        self.stop_locked(&mut state).await
    }

    async fn stop_locked(&self, state: &mut SessionState) -> Result<(), SessionError> {
        if !state.tracking {
            return Ok(());
        }
        state.tracking = false;

        if let Some(ingest) = state.ingest.take() {
            ingest.cancel();
        }
        self.inner.source.stop_updates();
        if let Some(ticker) = state.ticker.take() {
            ticker.cancel();
        }
        if let Some(window) = state.window.take() {
            window.release();
        }

        info!(session = %self.inner.id, "Tracking stopped");
        match self.inner.reconciler.stop().await {
            Ok(()) => Ok(()),
            // A reconciler that has shut down is already idle.
            Err(ReconcilerError::Unavailable) => {
                debug!("Reconciler already shut down");
                Ok(())
            }
        }
    }

    fn lock_sampler(&self) -> std::sync::MutexGuard<'_, CadenceSampler> {
        self.inner
            .sampler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn span(&self) -> tracing::Span {
        info_span!("session", id = %self.inner.id)
    }

    /// Source -> sampler -> reconciler, in arrival order.
    fn spawn_ingest(&self, mut stream: CadenceStream, generation: u64) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let session = self.clone();

        tokio::spawn(
            async move {
                loop {
                    let item = tokio::select! {
                        _ = token.cancelled() => return,
                        item = stream.recv() => item,
                    };

                    match item {
                        Some(Ok(reading)) => {
                            let updated = session.lock_sampler().on_reading(reading);
                            if let Some(cadence) = updated {
                                if session.inner.reconciler.cadence_updated(cadence).await.is_err() {
                                    warn!("Reconciler gone, stopping cadence ingestion");
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Cadence source failed: {}", e);
                            break;
                        }
                        None => {
                            warn!("Cadence source ended unexpectedly");
                            break;
                        }
                    }
                }

                if let Err(e) = session.stop_generation(generation).await {
                    warn!("Failed to stop tracking after source failure: {}", e);
                }
            }
            .instrument(self.span()),
        );

        cancel
    }

    /// Foreground periodic refill check.
    fn spawn_ticker(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let reconciler = self.inner.reconciler.clone();
        let period = self.inner.settings.poll_interval;

        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {}
                    }
                    if reconciler.tick().is_err() {
                        break;
                    }
                }
                debug!("Foreground ticker stopped");
            }
            .instrument(self.span()),
        );

        cancel
    }

    fn spawn_window(&self, window: Arc<BackgroundWindow>, generation: u64) {
        let session = self.clone();
        let reconciler = self.inner.reconciler.clone();

        tokio::spawn(
            async move {
                let exit = window
                    .run(|| {
                        if let Err(e) = reconciler.tick() {
                            debug!("Background tick dropped: {}", e);
                        }
                        async {}
                    })
                    .await;

                if exit.is_time_limit() {
                    info!("Background time is up ({}), stopping tracking", exit.as_str());
                    if let Err(e) = session.stop_generation(generation).await {
                        warn!("Failed to stop tracking after background window: {}", e);
                    }
                }
            }
            .instrument(self.span()),
        );
    }
}
