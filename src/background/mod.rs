//! Bounded background execution.
//!
//! When the app leaves the foreground the sync loop may keep running only
//! for as long as the host grants extra time. [`BackgroundWindow`] holds one
//! such grant, polls the loop until the allowance is nearly used up or the
//! elapsed-time cap is reached, and gives the grant back exactly once.

mod host;

pub use host::{BackgroundExecutionHost, ExpiryCallback, SimulatedHost};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::BackgroundSettings;
use crate::metrics;

/// Why a background window stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowExit {
    /// Remaining host allowance dropped to the safety margin.
    AllowanceExhausted,
    /// The elapsed-time cap was reached.
    ElapsedCap,
    /// The host took the time back.
    Expired,
    /// Released from outside, e.g. on return to foreground.
    Released,
}

impl WindowExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowExit::AllowanceExhausted => "allowance_exhausted",
            WindowExit::ElapsedCap => "elapsed_cap",
            WindowExit::Expired => "expired",
            WindowExit::Released => "released",
        }
    }

    /// The window ran out on its own rather than being torn down.
    pub fn is_time_limit(&self) -> bool {
        !matches!(self, WindowExit::Released)
    }
}

pub struct BackgroundWindow {
    host: Arc<dyn BackgroundExecutionHost>,
    settings: BackgroundSettings,
    held: AtomicBool,
    teardown: CancellationToken,
    expired: CancellationToken,
    entered_at: Instant,
}

impl BackgroundWindow {
    /// Request extra time from the host. `None` when the host refuses.
    pub fn enter(
        host: Arc<dyn BackgroundExecutionHost>,
        settings: BackgroundSettings,
    ) -> Option<Self> {
        let expired = CancellationToken::new();
        let on_expiry = {
            let expired = expired.clone();
            Box::new(move || expired.cancel())
        };

        if !host.request_extra_time(on_expiry) {
            info!("Host refused background execution time");
            return None;
        }

        info!(
            "Background window entered ({:?} remaining, cap {:?})",
            host.remaining_time(),
            settings.max_elapsed
        );
        Some(Self {
            host,
            settings,
            held: AtomicBool::new(true),
            teardown: CancellationToken::new(),
            expired,
            entered_at: Instant::now(),
        })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.entered_at.elapsed()
    }

    /// Give the grant back and stop a running [`run`](Self::run). Safe to
    /// call any number of times; only the first call reaches the host.
    pub fn release(&self) {
        self.teardown.cancel();
        if self.held.swap(false, Ordering::AcqRel) {
            self.host.release_extra_time();
            info!("Background window released after {:?}", self.elapsed());
        }
    }

    /// Call `tick` every poll interval until the window ends, then release
    /// the grant.
    ///
    /// Whatever `tick` does, this returns no later than the earlier of the
    /// elapsed cap and the allowance (minus the safety margin) reported at
    /// the start.
    pub async fn run<F, Fut>(&self, mut tick: F) -> WindowExit
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let cap_deadline = self.entered_at + self.settings.max_elapsed;
        let allowance_deadline = Instant::now()
            + self
                .host
                .remaining_time()
                .saturating_sub(self.settings.safety_margin);
        let hard_deadline = cap_deadline.min(allowance_deadline);

        let exit = match timeout_at(hard_deadline, self.poll(&mut tick)).await {
            Ok(exit) => exit,
            Err(_) if hard_deadline == cap_deadline => WindowExit::ElapsedCap,
            Err(_) => WindowExit::AllowanceExhausted,
        };

        self.release();
        metrics::record_window_exit(exit.as_str());
        info!("Background window ended: {}", exit.as_str());
        exit
    }

    async fn poll<F, Fut>(&self, tick: &mut F) -> WindowExit
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.teardown.cancelled() => return WindowExit::Released,
                _ = self.expired.cancelled() => return WindowExit::Expired,
                _ = interval.tick() => {}
            }

            let remaining = self.host.remaining_time();
            if remaining <= self.settings.safety_margin {
                return WindowExit::AllowanceExhausted;
            }
            if self.elapsed() >= self.settings.max_elapsed {
                return WindowExit::ElapsedCap;
            }

            debug!("Background tick, {:?} remaining", remaining);
            tick().await;
        }
    }
}

impl Drop for BackgroundWindow {
    fn drop(&mut self) {
        self.release();
    }
}
