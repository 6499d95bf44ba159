//! Tempo target resolution.
//!
//! Turns the current cadence and the configured mode into the BPM the next
//! track should match, and builds the catalog query for that target.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cadence::SmoothedCadence;
use crate::config::MatchingSettings;

/// How the target tempo is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TempoMode {
    /// Fixed tempo chosen by the user, cadence is ignored.
    Manual { bpm: f64 },
    /// Follow the runner's cadence.
    #[default]
    Dynamic,
}

/// The BPM the next recommendation should match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoTarget {
    pub bpm: f64,
}

impl TempoTarget {
    pub fn new(bpm: f64) -> Self {
        Self { bpm }
    }

    /// Lower bound of the acceptable range, never below zero.
    pub fn min_tempo(&self, matching: &MatchingSettings) -> f64 {
        (self.bpm - matching.tempo_below).max(0.0)
    }

    pub fn max_tempo(&self, matching: &MatchingSettings) -> f64 {
        self.bpm + matching.tempo_above
    }
}

impl std::fmt::Display for TempoTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}

/// Resolve the tempo to match for the given cadence and mode.
pub fn resolve(cadence: SmoothedCadence, mode: &TempoMode) -> TempoTarget {
    match mode {
        TempoMode::Manual { bpm } => TempoTarget::new(*bpm),
        TempoMode::Dynamic => TempoTarget::new(cadence.as_bpm()),
    }
}

/// Parameters of one recommendation request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationQuery {
    pub min_tempo: f64,
    pub max_tempo: f64,
    pub min_danceability: f64,
    pub target_danceability: f64,
    pub genre_seeds: Vec<String>,
    pub limit: u32,
}

/// Build the catalog query for a target.
///
/// The target danceability is drawn uniformly from the configured range on
/// every call, so two queries for the same target usually differ.
pub fn build_query<R: Rng>(
    target: &TempoTarget,
    genre_seeds: &[String],
    matching: &MatchingSettings,
    rng: &mut R,
) -> RecommendationQuery {
    let target_danceability = rng.random_range(
        matching.target_danceability_min..matching.target_danceability_max,
    );

    RecommendationQuery {
        min_tempo: target.min_tempo(matching),
        max_tempo: target.max_tempo(matching),
        min_danceability: matching.min_danceability,
        target_danceability,
        genre_seeds: genre_seeds.to_vec(),
        limit: matching.recommendation_limit,
    }
}
