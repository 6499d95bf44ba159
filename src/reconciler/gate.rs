use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::metrics;

/// Single-flight guard for recommendation fetches.
///
/// At most one [`GatePermit`] exists at any time. A caller that fails to
/// acquire gets `None` and is expected to skip its fetch, not wait.
#[derive(Debug, Clone, Default)]
pub struct RecommendationGate {
    in_flight: Arc<AtomicBool>,
}

impl RecommendationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                metrics::set_fetch_in_flight(true);
                GatePermit {
                    in_flight: Arc::clone(&self.in_flight),
                }
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Proof of an acquired gate. The gate reopens when the permit is released
/// or dropped, whichever happens first, so every exit path of the guarded
/// fetch releases exactly once.
#[derive(Debug)]
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GatePermit {
    in_flight: Arc<AtomicBool>,
}

impl GatePermit {
    pub fn release(self) {}
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
        metrics::set_fetch_in_flight(false);
    }
}
