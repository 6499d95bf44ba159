//! HTTP client for the catalog Web API.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::models::{parse_audio_features, parse_recommendations, parse_user_profile};
use super::{
    AudioFeatureService, CatalogError, CatalogService, ProfileService, Track, UserProfile,
};
use crate::tempo::RecommendationQuery;

/// Catalog client talking to the Web API with a bearer credential.
///
/// The credential is obtained by the authorization flow elsewhere and can be
/// swapped at runtime. Without one, every call fails with
/// [`CatalogError::NoCredential`] before touching the network.
pub struct WebApiClient {
    client: reqwest::Client,
    base_url: String,
    access_token: RwLock<Option<String>>,
}

impl WebApiClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the API (e.g., "https://api.spotify.com/v1")
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(base_url: &str, timeout_sec: u64) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .map_err(|e| CatalogError::Transport(format!("failed to build HTTP client: {}", e)))?;

        // Ensure base_url doesn't have trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            access_token: RwLock::new(None),
        })
    }

    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        self.set_access_token(token);
        self
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        let mut guard = self.access_token.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token.into());
    }

    pub fn clear_access_token(&self) {
        let mut guard = self.access_token.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn has_credential(&self) -> bool {
        self.access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn token(&self) -> Result<String, CatalogError> {
        self.access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(CatalogError::NoCredential)
    }

    /// GET `path` with the given query and return the body of a 2xx response.
    async fn get_text(&self, path: &str, query: &[(&str, String)]) -> Result<String, CatalogError> {
        let token = self.token()?;
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(CatalogError::Api {
                status: status.as_u16(),
                message: truncate(&body, 200),
            });
        }

        Ok(body)
    }
}

/// Query parameters of a recommendations request.
pub(crate) fn recommendation_params(query: &RecommendationQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("limit", query.limit.to_string())];
    if !query.genre_seeds.is_empty() {
        params.push(("seed_genres", query.genre_seeds.join(",")));
    }
    params.push(("min_danceability", query.min_danceability.to_string()));
    params.push(("target_danceability", query.target_danceability.to_string()));
    params.push(("min_tempo", query.min_tempo.to_string()));
    params.push(("max_tempo", query.max_tempo.to_string()));
    params
}

/// The id part of a `scheme:type:id` URI. Strings without a `:` are
/// returned unchanged.
pub fn track_id_from_uri(uri: &str) -> &str {
    uri.rsplit(':').next().unwrap_or(uri)
}

fn map_transport_error(error: reqwest::Error) -> CatalogError {
    if error.is_timeout() {
        CatalogError::Timeout
    } else {
        CatalogError::Transport(error.to_string())
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

#[async_trait]
impl CatalogService for WebApiClient {
    async fn recommend(&self, query: &RecommendationQuery) -> Result<Vec<Track>, CatalogError> {
        let body = self
            .get_text("/recommendations", &recommendation_params(query))
            .await?;
        parse_recommendations(&body)
    }
}

#[async_trait]
impl AudioFeatureService for WebApiClient {
    async fn tempo_of(&self, track_uri: &str) -> Result<f64, CatalogError> {
        let path = format!("/audio-features/{}", track_id_from_uri(track_uri));
        let body = self.get_text(&path, &[]).await?;
        parse_audio_features(&body)
    }
}

#[async_trait]
impl ProfileService for WebApiClient {
    async fn current_user(&self) -> Result<UserProfile, CatalogError> {
        let body = self.get_text("/me", &[]).await?;
        parse_user_profile(&body)
    }
}
