use std::sync::Arc;
use std::time::Instant;

use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::gate::{GatePermit, RecommendationGate};
use super::handle::ReconcilerHandle;
use super::queue::InternalQueue;
use super::{FetchOutcome, QueueSnapshot, RefillDecision, RefillStats, RunState};
use crate::cadence::SmoothedCadence;
use crate::catalog::{CatalogService, Track};
use crate::config::{MatchingSettings, ReconcilerSettings, TrackingPreferences};
use crate::metrics;
use crate::playback::{ensure_connected, PlaybackEngine, PlayerState};
use crate::tempo::{self, RecommendationQuery, TempoMode, TempoTarget};

/// Commands processed by the reconciler loop.
pub(crate) enum ReconcilerCommand {
    Start {
        response: oneshot::Sender<()>,
    },
    Stop {
        response: oneshot::Sender<()>,
    },
    CadenceUpdated(SmoothedCadence),
    PlayerStateChanged(PlayerState),
    Tick,
    /// A fetch settled. The permit travels with the result so the gate
    /// stays closed until the outcome has been applied.
    CandidateReady {
        outcome: FetchOutcome,
        permit: GatePermit,
    },
    Snapshot {
        response: oneshot::Sender<QueueSnapshot>,
    },
}

/// Owns the internal queue and decides when to fetch and enqueue tracks.
pub struct QueueReconciler {
    queue: InternalQueue,
    run_state: RunState,
    run_state_tx: watch::Sender<RunState>,
    gate: RecommendationGate,

    /// Latest cadence estimate.
    cadence: SmoothedCadence,
    last_target: Option<TempoTarget>,
    /// Last URI reported by the engine, paused or not.
    now_playing_uri: Option<String>,
    /// The queue head has been seen playing.
    head_active: bool,
    last_decision: Option<RefillDecision>,

    preferences: watch::Receiver<TrackingPreferences>,
    matching: MatchingSettings,
    lookahead: usize,

    catalog: Arc<dyn CatalogService>,
    engine: Arc<dyn PlaybackEngine>,

    /// Used by fetch tasks to report back without keeping the loop alive.
    completion_tx: mpsc::WeakSender<ReconcilerCommand>,
    command_rx: mpsc::Receiver<ReconcilerCommand>,
    shutdown: CancellationToken,

    stats: RefillStats,
}

impl QueueReconciler {
    /// Create a reconciler and the handle used to drive it. Nothing happens
    /// until [`run`](Self::run) is polled.
    pub fn new(
        catalog: Arc<dyn CatalogService>,
        engine: Arc<dyn PlaybackEngine>,
        preferences: watch::Receiver<TrackingPreferences>,
        matching: MatchingSettings,
        settings: &ReconcilerSettings,
        shutdown: CancellationToken,
    ) -> (Self, ReconcilerHandle) {
        let (command_tx, command_rx) = mpsc::channel(settings.command_buffer.max(1));
        let (run_state_tx, run_state_rx) = watch::channel(RunState::Idle);

        let reconciler = Self {
            queue: InternalQueue::new(),
            run_state: RunState::Idle,
            run_state_tx,
            gate: RecommendationGate::new(),
            cadence: SmoothedCadence::ZERO,
            last_target: None,
            now_playing_uri: None,
            head_active: false,
            last_decision: None,
            preferences,
            matching,
            lookahead: settings.lookahead.max(1),
            catalog,
            engine,
            completion_tx: command_tx.downgrade(),
            command_rx,
            shutdown,
            stats: RefillStats::default(),
        };
        let handle = ReconcilerHandle::new(command_tx, run_state_rx);
        (reconciler, handle)
    }

    /// Convenience for `new` followed by spawning `run`.
    pub fn spawn(
        catalog: Arc<dyn CatalogService>,
        engine: Arc<dyn PlaybackEngine>,
        preferences: watch::Receiver<TrackingPreferences>,
        matching: MatchingSettings,
        settings: &ReconcilerSettings,
        shutdown: CancellationToken,
    ) -> (ReconcilerHandle, JoinHandle<()>) {
        let (reconciler, handle) =
            Self::new(catalog, engine, preferences, matching, settings, shutdown);
        (handle, tokio::spawn(reconciler.run()))
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Queue reconciler started (lookahead {})", self.lookahead);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Queue reconciler shutting down");
                    break;
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("All reconciler handles dropped");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: ReconcilerCommand) {
        match command {
            ReconcilerCommand::Start { response } => {
                self.set_run_state(RunState::Tracking);
                let _ = response.send(());
                self.maybe_refill();
            }
            ReconcilerCommand::Stop { response } => {
                self.set_run_state(RunState::Idle);
                // The next run targets its own readings only.
                self.cadence = SmoothedCadence::ZERO;
                let _ = response.send(());
            }
            ReconcilerCommand::CadenceUpdated(cadence) => {
                if self.run_state == RunState::Idle {
                    debug!("Ignoring cadence update while idle");
                    return;
                }
                self.cadence = cadence;
                self.maybe_refill();
            }
            ReconcilerCommand::PlayerStateChanged(state) => {
                self.on_player_state(state);
            }
            ReconcilerCommand::Tick => {
                self.maybe_refill();
            }
            ReconcilerCommand::CandidateReady { outcome, permit } => {
                self.on_fetch_settled(outcome, permit).await;
            }
            ReconcilerCommand::Snapshot { response } => {
                let _ = response.send(self.snapshot());
            }
        }
    }

    fn set_run_state(&mut self, state: RunState) {
        if self.run_state == state {
            return;
        }
        info!("Run state {:?} -> {:?}", self.run_state, state);
        self.run_state = state;
        self.run_state_tx.send_replace(state);
    }

    fn maybe_refill(&mut self) {
        let decision = self.decide_refill();
        self.last_decision = Some(decision);
    }

    /// Start a fetch if tracking and the queue is short. Never waits for the
    /// fetch itself.
    fn decide_refill(&mut self) -> RefillDecision {
        if self.run_state != RunState::Tracking || self.queue.len() >= self.lookahead {
            return RefillDecision::NotNeeded;
        }

        // One consistent view of the preferences for the whole decision.
        let preferences = self.preferences.borrow().clone();
        if preferences.mode == TempoMode::Dynamic && self.cadence.steps_per_min() <= 0.0 {
            debug!("No cadence yet, not refilling");
            return RefillDecision::AwaitingCadence;
        }

        let target = tempo::resolve(self.cadence, &preferences.mode);
        self.last_target = Some(target);

        let Some(permit) = self.gate.try_acquire() else {
            debug!("Recommendation already in flight, skipping refill");
            self.stats.gate_denied += 1;
            metrics::record_gate_denied();
            return RefillDecision::GateBusy;
        };

        let query = next_query(&target, &preferences, &self.matching);
        self.stats.attempts += 1;
        info!(
            "Requesting recommendation for {} ({:.1}-{:.1})",
            target, query.min_tempo, query.max_tempo
        );

        let catalog = Arc::clone(&self.catalog);
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match catalog.recommend(&query).await {
                Ok(tracks) => match choose_random(tracks) {
                    Some(track) => FetchOutcome::Candidate(track),
                    None => FetchOutcome::Empty,
                },
                Err(e) => {
                    warn!("Recommendation request failed: {}", e);
                    FetchOutcome::Failed(e)
                }
            };
            metrics::record_recommendation(outcome.label(), started.elapsed());

            // If the loop is gone the permit is dropped here, which still
            // reopens the gate.
            match completion_tx.upgrade() {
                Some(tx) => {
                    if tx
                        .send(ReconcilerCommand::CandidateReady { outcome, permit })
                        .await
                        .is_err()
                    {
                        debug!("Reconciler stopped before fetch settled");
                    }
                }
                None => debug!("Reconciler gone, discarding fetch result"),
            }
        });

        RefillDecision::Dispatched
    }

    async fn on_fetch_settled(&mut self, outcome: FetchOutcome, permit: GatePermit) {
        let appended = match outcome {
            FetchOutcome::Empty => {
                info!("No recommendation matched the current target");
                self.stats.empty_results += 1;
                false
            }
            FetchOutcome::Failed(_) => {
                self.stats.failures += 1;
                false
            }
            FetchOutcome::Candidate(track) => self.accept_candidate(track).await,
        };
        permit.release();

        if appended {
            // Only matters with a lookahead above one.
            self.maybe_refill();
        }
    }

    async fn accept_candidate(&mut self, track: Track) -> bool {
        if self.run_state != RunState::Tracking {
            debug!("Tracking stopped, discarding late candidate {}", track.uri);
            self.stats.discarded += 1;
            return false;
        }
        if self.queue.contains(&track.uri)
            || self.now_playing_uri.as_deref() == Some(track.uri.as_str())
        {
            debug!("Discarding duplicate candidate {}", track.uri);
            self.stats.discarded += 1;
            return false;
        }

        let enqueued = match ensure_connected(self.engine.as_ref()).await {
            Ok(()) => self.engine.enqueue(&track.uri).await,
            Err(e) => Err(e),
        };
        if let Err(e) = enqueued {
            warn!("Failed to enqueue {}: {}", track.uri, e);
            self.stats.failures += 1;
            return false;
        }

        info!("Queued \"{}\" by {} ({})", track.name, track.artist, track.uri);
        self.queue.push(track);
        self.stats.appended += 1;
        metrics::record_track_enqueued();
        metrics::set_queue_length(self.queue.len());
        true
    }

    /// Retire queue entries that have finished playing.
    ///
    /// The head becomes active once it is seen playing. It is retired when a
    /// different track shows up afterwards, or when its own state reports the
    /// end of the track. Paused states change nothing.
    fn on_player_state(&mut self, state: PlayerState) {
        self.now_playing_uri = Some(state.track_uri.clone());

        if state.is_paused {
            debug!("Playback paused on {}, queue unchanged", state.track_uri);
            return;
        }

        let mut retired = 0usize;
        while let Some(head) = self.queue.head() {
            if head.uri == state.track_uri {
                if state.has_finished() {
                    self.retire_head();
                    retired += 1;
                    continue;
                }
                self.head_active = true;
                break;
            }
            if self.head_active {
                self.retire_head();
                retired += 1;
                continue;
            }
            break;
        }

        if retired > 0 {
            self.stats.retired += retired as u64;
            metrics::record_tracks_retired(retired);
            metrics::set_queue_length(self.queue.len());
            self.maybe_refill();
        }
    }

    fn retire_head(&mut self) {
        if let Some(track) = self.queue.remove_head() {
            debug!("Retired {}", track.uri);
        }
        self.head_active = false;
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            run_state: self.run_state,
            queue: self.queue.to_vec(),
            fetch_in_flight: self.gate.is_in_flight(),
            cadence: self.cadence,
            last_target: self.last_target,
            now_playing_uri: self.now_playing_uri.clone(),
            last_decision: self.last_decision,
            stats: self.stats,
        }
    }
}

/// Pick one candidate uniformly at random.
pub fn pick_candidate<'a, R: Rng>(tracks: &'a [Track], rng: &mut R) -> Option<&'a Track> {
    tracks.choose(rng)
}

fn choose_random(tracks: Vec<Track>) -> Option<Track> {
    pick_candidate(&tracks, &mut rand::rng()).cloned()
}

fn next_query(
    target: &TempoTarget,
    preferences: &TrackingPreferences,
    matching: &MatchingSettings,
) -> RecommendationQuery {
    tempo::build_query(target, &preferences.genre_seeds, matching, &mut rand::rng())
}
