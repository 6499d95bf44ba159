use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::actor::ReconcilerCommand;
use super::{QueueSnapshot, ReconcilerError, RunState};
use crate::cadence::SmoothedCadence;
use crate::playback::PlayerState;

/// Cloneable handle to a running [`QueueReconciler`](super::QueueReconciler).
#[derive(Clone)]
pub struct ReconcilerHandle {
    command_tx: mpsc::Sender<ReconcilerCommand>,
    run_state: watch::Receiver<RunState>,
}

impl ReconcilerHandle {
    pub(super) fn new(
        command_tx: mpsc::Sender<ReconcilerCommand>,
        run_state: watch::Receiver<RunState>,
    ) -> Self {
        Self {
            command_tx,
            run_state,
        }
    }

    /// Idle -> Tracking. Resolves once the transition has been applied.
    pub async fn start(&self) -> Result<(), ReconcilerError> {
        let (response, rx) = oneshot::channel();
        self.send(ReconcilerCommand::Start { response }).await?;
        rx.await.map_err(|_| ReconcilerError::Unavailable)
    }

    /// Tracking -> Idle. An in-flight fetch is left to settle on its own.
    pub async fn stop(&self) -> Result<(), ReconcilerError> {
        let (response, rx) = oneshot::channel();
        self.send(ReconcilerCommand::Stop { response }).await?;
        rx.await.map_err(|_| ReconcilerError::Unavailable)
    }

    pub async fn cadence_updated(&self, cadence: SmoothedCadence) -> Result<(), ReconcilerError> {
        self.send(ReconcilerCommand::CadenceUpdated(cadence)).await
    }

    pub async fn player_state_changed(&self, state: PlayerState) -> Result<(), ReconcilerError> {
        self.send(ReconcilerCommand::PlayerStateChanged(state))
            .await
    }

    /// Periodic "do we need a track" check. Dropped if the reconciler is
    /// backed up, since the next tick does the same thing.
    pub fn tick(&self) -> Result<(), ReconcilerError> {
        match self.command_tx.try_send(ReconcilerCommand::Tick) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Reconciler busy, dropping tick");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ReconcilerError::Unavailable),
        }
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, ReconcilerError> {
        let (response, rx) = oneshot::channel();
        self.send(ReconcilerCommand::Snapshot { response }).await?;
        rx.await.map_err(|_| ReconcilerError::Unavailable)
    }

    pub fn run_state(&self) -> RunState {
        *self.run_state.borrow()
    }

    pub fn subscribe_run_state(&self) -> watch::Receiver<RunState> {
        self.run_state.clone()
    }

    async fn send(&self, command: ReconcilerCommand) -> Result<(), ReconcilerError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ReconcilerError::Unavailable)
    }
}
