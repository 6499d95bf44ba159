use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub api_base_url: Option<String>,
    pub access_token: Option<String>,
    pub request_timeout_sec: Option<u64>,

    // Tracking preferences
    /// "manual" or "dynamic"
    pub mode: Option<String>,
    pub manual_tempo: Option<f64>,
    pub genres: Option<Vec<String>>,

    // Feature configs
    pub matching: Option<MatchingConfig>,
    pub reconciler: Option<ReconcilerConfig>,
    pub background: Option<BackgroundConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MatchingConfig {
    pub tempo_below: Option<f64>,
    pub tempo_above: Option<f64>,
    pub min_danceability: Option<f64>,
    pub target_danceability_min: Option<f64>,
    pub target_danceability_max: Option<f64>,
    pub recommendation_limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub poll_interval_ms: Option<u64>,
    pub lookahead: Option<usize>,
    pub smoothing_window: Option<usize>,
    pub command_buffer: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundConfig {
    pub safety_margin_ms: Option<u64>,
    pub max_elapsed_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
