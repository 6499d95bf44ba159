//! Cadence ingestion.
//!
//! Raw step-rate readings arrive from a [`CadenceSource`] in steps per second.
//! The [`CadenceSampler`] turns them into a [`SmoothedCadence`] expressed in
//! steps per minute and publishes every update to its subscribers.

mod sampler;
mod source;

pub use sampler::CadenceSampler;
pub use source::{CadenceSource, CadenceStream, ScriptedCadenceSource};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A single reading from the step counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadenceReading {
    pub steps_per_sec: f64,
    pub timestamp: DateTime<Utc>,
}

impl CadenceReading {
    pub fn new(steps_per_sec: f64) -> Self {
        Self {
            steps_per_sec,
            timestamp: Utc::now(),
        }
    }

    pub fn at(steps_per_sec: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            steps_per_sec,
            timestamp,
        }
    }

    /// A reading is usable when it is a finite, non-negative rate.
    pub fn is_valid(&self) -> bool {
        self.steps_per_sec.is_finite() && self.steps_per_sec >= 0.0
    }

    pub fn steps_per_min(&self) -> f64 {
        self.steps_per_sec * 60.0
    }
}

/// Best current estimate of the runner's cadence, in steps per minute.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct SmoothedCadence(f64);

impl SmoothedCadence {
    pub const ZERO: SmoothedCadence = SmoothedCadence(0.0);

    pub fn from_steps_per_min(steps_per_min: f64) -> Self {
        Self(steps_per_min)
    }

    pub fn steps_per_min(&self) -> f64 {
        self.0
    }

    /// One step per beat: steps/min and BPM are the same number.
    pub fn as_bpm(&self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for SmoothedCadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1} spm", self.0)
    }
}

/// Errors raised by a cadence source.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CadenceError {
    #[error("Cadence data is not available on this device")]
    Unavailable,

    #[error("Cadence source failed: {0}")]
    SourceFailed(String),
}
