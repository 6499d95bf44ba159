//! Pacebeat library
//!
//! Keeps a playback queue in step with a runner's cadence. Exposes the
//! internal modules for the binary and for integration tests.

pub mod background;
pub mod cadence;
pub mod catalog;
pub mod config;
pub mod metrics;
pub mod playback;
pub mod reconciler;
pub mod session;
pub mod tempo;

// Re-export commonly used types for convenience
pub use cadence::{CadenceReading, CadenceSampler, CadenceSource, SmoothedCadence};
pub use catalog::{CatalogError, CatalogService, Track, WebApiClient};
pub use config::{AppConfig, TrackingPreferences};
pub use playback::{PlaybackEngine, PlayerState};
pub use reconciler::{QueueReconciler, QueueSnapshot, ReconcilerHandle, RunState};
pub use session::TrackingSession;
pub use tempo::{TempoMode, TempoTarget};
