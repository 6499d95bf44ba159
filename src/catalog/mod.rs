//! Track catalog access.
//!
//! The sync loop only needs three things from the catalog: recommendations
//! for a tempo range, the measured tempo of a track (for display) and the
//! signed-in user's profile. Each is a separate trait so tests can fake them
//! independently; [`WebApiClient`] implements all three over HTTP.

mod client;
mod models;

pub use client::{track_id_from_uri, WebApiClient};
pub use models::{parse_audio_features, parse_recommendations, parse_user_profile};

use async_trait::async_trait;
use thiserror::Error;

use crate::tempo::RecommendationQuery;

/// A playable track as returned by the catalog.
///
/// Two tracks are equal when their URIs are equal.
#[derive(Debug, Clone)]
pub struct Track {
    pub uri: String,
    pub name: String,
    pub artist: String,
    pub duration_secs: u64,
    pub artwork_url: String,
    /// Measured tempo, when known.
    pub tempo: Option<f64>,
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for Track {}

impl std::hash::Hash for Track {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub display_name: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogError {
    #[error("No credential available, authorization required")]
    NoCredential,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Catalog API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl CatalogError {
    /// Short label used for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogError::NoCredential => "no_credential",
            CatalogError::Transport(_) | CatalogError::Timeout | CatalogError::Api { .. } => {
                "transport"
            }
            CatalogError::MalformedResponse(_) => "malformed",
        }
    }
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Candidate tracks matching the query. An empty list is a valid answer.
    async fn recommend(&self, query: &RecommendationQuery) -> Result<Vec<Track>, CatalogError>;
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait AudioFeatureService: Send + Sync {
    /// Measured tempo of a track in BPM.
    async fn tempo_of(&self, track_uri: &str) -> Result<f64, CatalogError>;
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn current_user(&self) -> Result<UserProfile, CatalogError>;
}
