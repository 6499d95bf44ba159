//! Queue reconciliation.
//!
//! [`QueueReconciler`] is the single owner of the internal queue, the fetch
//! gate and the run state. Cadence updates, player state changes, periodic
//! checks and fetch completions all arrive as commands on one channel and
//! are applied one at a time, so no two transitions ever interleave.
//!
//! Refill policy: while tracking, whenever the queue holds fewer than
//! `lookahead` tracks (default one, i.e. "only when empty") a recommendation
//! is fetched for the current tempo target. The fetch runs on its own task
//! and reports back through the same channel.

mod actor;
mod gate;
mod handle;
mod queue;

pub use actor::{pick_candidate, QueueReconciler};
pub use gate::{GatePermit, RecommendationGate};
pub use handle::ReconcilerHandle;
pub use queue::InternalQueue;

use thiserror::Error;

use crate::cadence::SmoothedCadence;
use crate::catalog::{CatalogError, Track};
use crate::tempo::TempoTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Tracking,
}

/// What a refill check decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillDecision {
    /// Idle, or the queue already holds enough tracks.
    NotNeeded,
    /// Dynamic mode without any cadence yet.
    AwaitingCadence,
    /// Another fetch is in flight; this check is dropped.
    GateBusy,
    /// A fetch was started.
    Dispatched,
}

/// How a recommendation fetch settled.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Candidate(Track),
    Empty,
    Failed(CatalogError),
}

impl FetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Candidate(_) => "success",
            FetchOutcome::Empty => "empty",
            FetchOutcome::Failed(e) => e.kind(),
        }
    }
}

/// Counters kept by the reconciler since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillStats {
    /// Fetches started.
    pub attempts: u64,
    pub gate_denied: u64,
    pub appended: u64,
    pub empty_results: u64,
    /// Failed fetches and failed engine enqueues.
    pub failures: u64,
    /// Candidates dropped as duplicates or because tracking stopped.
    pub discarded: u64,
    pub retired: u64,
}

/// Point-in-time view of the reconciler.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub run_state: RunState,
    pub queue: Vec<Track>,
    pub fetch_in_flight: bool,
    pub cadence: SmoothedCadence,
    pub last_target: Option<TempoTarget>,
    pub now_playing_uri: Option<String>,
    /// Outcome of the most recent refill check, `None` before the first.
    pub last_decision: Option<RefillDecision>,
    pub stats: RefillStats,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconcilerError {
    #[error("Queue reconciler is not running")]
    Unavailable,
}
