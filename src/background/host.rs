use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Called by the host when the granted time runs out.
pub type ExpiryCallback = Box<dyn FnOnce() + Send + 'static>;

/// The environment's "may I keep running" capability.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait BackgroundExecutionHost: Send + Sync {
    /// Ask for extra run time. `on_expiry` fires if the host takes it back
    /// before it was released.
    fn request_extra_time(&self, on_expiry: ExpiryCallback) -> bool;

    /// Give the extra time back.
    fn release_extra_time(&self);

    /// Time left on the current grant, zero when nothing is held.
    fn remaining_time(&self) -> Duration;
}

struct Grant {
    started: Instant,
    on_expiry: Option<ExpiryCallback>,
}

/// Host with a fixed allowance per grant that runs down with tokio time,
/// so it can be driven from paused-clock tests.
pub struct SimulatedHost {
    allowance: Duration,
    grant: Mutex<Option<Grant>>,
    deny: AtomicBool,
    grants: AtomicUsize,
    releases: AtomicUsize,
}

impl SimulatedHost {
    pub fn new(allowance: Duration) -> Self {
        Self {
            allowance,
            grant: Mutex::new(None),
            deny: AtomicBool::new(false),
            grants: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    /// Refuse every further request.
    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn grant_count(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }

    /// Number of releases that actually gave back a held grant.
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        self.lock().is_some()
    }

    /// Take the time back right now, firing the expiry callback.
    pub fn expire_now(&self) {
        let callback = self.lock().as_mut().and_then(|g| g.on_expiry.take());
        if let Some(callback) = callback {
            debug!("Simulated host expiring background grant");
            callback();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Grant>> {
        self.grant.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BackgroundExecutionHost for SimulatedHost {
    fn request_extra_time(&self, on_expiry: ExpiryCallback) -> bool {
        if self.deny.load(Ordering::SeqCst) {
            return false;
        }
        *self.lock() = Some(Grant {
            started: Instant::now(),
            on_expiry: Some(on_expiry),
        });
        self.grants.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn release_extra_time(&self) {
        if self.lock().take().is_some() {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn remaining_time(&self) -> Duration {
        self.lock()
            .as_ref()
            .map(|g| self.allowance.saturating_sub(g.started.elapsed()))
            .unwrap_or(Duration::ZERO)
    }
}
