use std::collections::VecDeque;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::{CadenceReading, SmoothedCadence};

/// Turns raw readings into the current cadence estimate.
///
/// With a window of one (the default) the estimate is simply the latest
/// reading. Larger windows average the last `window_size` readings, which
/// still updates on every reading so latency stays within one source interval.
///
/// Every accepted reading is published on a `watch` channel in arrival order.
pub struct CadenceSampler {
    window: VecDeque<f64>,
    window_size: usize,
    publisher: watch::Sender<SmoothedCadence>,
}

impl CadenceSampler {
    pub fn new(window_size: usize) -> Self {
        let (publisher, _) = watch::channel(SmoothedCadence::ZERO);
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            publisher,
        }
    }

    /// Apply a reading. Returns the updated estimate, or `None` if the
    /// reading was rejected.
    pub fn on_reading(&mut self, reading: CadenceReading) -> Option<SmoothedCadence> {
        if !reading.is_valid() {
            warn!(
                "Ignoring invalid cadence reading: {} steps/sec",
                reading.steps_per_sec
            );
            return None;
        }

        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(reading.steps_per_min());

        let average = self.window.iter().sum::<f64>() / self.window.len() as f64;
        let cadence = SmoothedCadence::from_steps_per_min(average);
        debug!("Cadence updated to {}", cadence);

        // send_replace never fails, even with no subscribers left.
        self.publisher.send_replace(cadence);
        Some(cadence)
    }

    pub fn current(&self) -> SmoothedCadence {
        *self.publisher.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SmoothedCadence> {
        self.publisher.subscribe()
    }

    /// Forget previous readings, e.g. when tracking restarts.
    pub fn reset(&mut self) {
        self.window.clear();
        self.publisher.send_replace(SmoothedCadence::ZERO);
    }
}

impl Default for CadenceSampler {
    fn default() -> Self {
        Self::new(1)
    }
}
