use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{CadenceError, CadenceReading};

/// Readings (or a terminal error) emitted by a running source.
///
/// The stream ends when the source is stopped.
pub type CadenceStream = mpsc::Receiver<Result<CadenceReading, CadenceError>>;

/// Buffer between a source and its consumer.
const STREAM_BUFFER: usize = 32;

/// A step counter that periodically emits cadence readings.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait CadenceSource: Send + Sync {
    /// Whether the device can report cadence at all.
    fn is_available(&self) -> bool;

    /// Begin emitting readings. Calling this while already running restarts
    /// the subscription.
    fn start_updates(&self) -> Result<CadenceStream, CadenceError>;

    /// Stop emitting readings. A no-op when not running.
    fn stop_updates(&self);
}

/// Replays a fixed list of readings at a fixed interval, then keeps
/// repeating the last one until stopped.
pub struct ScriptedCadenceSource {
    readings: Vec<f64>,
    interval: Duration,
    running: Mutex<Option<CancellationToken>>,
}

impl ScriptedCadenceSource {
    /// # Arguments
    /// * `readings` - Steps per second, emitted in order
    /// * `interval` - Delay between two readings
    pub fn new(readings: Vec<f64>, interval: Duration) -> Self {
        Self {
            readings,
            interval,
            running: Mutex::new(None),
        }
    }

    fn replace_running(&self, token: Option<CancellationToken>) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = std::mem::replace(&mut *running, token) {
            previous.cancel();
        }
    }
}

impl CadenceSource for ScriptedCadenceSource {
    fn is_available(&self) -> bool {
        !self.readings.is_empty()
    }

    fn start_updates(&self) -> Result<CadenceStream, CadenceError> {
        if self.readings.is_empty() {
            return Err(CadenceError::Unavailable);
        }

        let token = CancellationToken::new();
        self.replace_running(Some(token.clone()));

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let readings = self.readings.clone();
        let interval = self.interval;

        info!(
            "Starting scripted cadence source ({} readings every {:?})",
            readings.len(),
            interval
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut index = 0usize;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let value = readings[index.min(readings.len() - 1)];
                index = index.saturating_add(1);

                if tx.send(Ok(CadenceReading::new(value))).await.is_err() {
                    debug!("Cadence consumer went away, stopping scripted source");
                    break;
                }
            }
        });

        Ok(rx)
    }

    fn stop_updates(&self) {
        self.replace_running(None);
    }
}
