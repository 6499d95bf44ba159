mod file_config;

pub use file_config::{BackgroundConfig, FileConfig, MatchingConfig, ReconcilerConfig};

use crate::tempo::TempoMode;
use anyhow::{bail, Result};
use std::time::Duration;

/// Default Web API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1";

/// Tempo used when manual mode is selected without an explicit value.
pub const DEFAULT_MANUAL_TEMPO: f64 = 160.0;

/// The catalog accepts at most this many genre seeds per request.
pub const MAX_GENRE_SEEDS: usize = 5;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub api_base_url: Option<String>,
    pub access_token: Option<String>,
    pub request_timeout_sec: u64,
    pub manual_tempo: Option<f64>,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub api_base_url: String,
    pub access_token: Option<String>,
    pub request_timeout_sec: u64,

    // User preferences, read-only for the sync loop
    pub preferences: TrackingPreferences,

    // Feature configs (with defaults)
    pub matching: MatchingSettings,
    pub reconciler: ReconcilerSettings,
    pub background: BackgroundSettings,
}

/// Preferences owned by the settings UI.
///
/// The sync loop only ever reads a snapshot of these, once per decision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackingPreferences {
    pub mode: TempoMode,
    pub genre_seeds: Vec<String>,
}

impl TrackingPreferences {
    pub fn new(mode: TempoMode, genre_seeds: Vec<String>) -> Result<Self> {
        let genre_seeds = normalize_genres(genre_seeds)?;
        if let TempoMode::Manual { bpm } = mode {
            validate_manual_tempo(bpm)?;
        }
        Ok(Self { mode, genre_seeds })
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let api_base_url = file
            .api_base_url
            .or_else(|| cli.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            bail!("api_base_url must be an http(s) URL: {}", api_base_url);
        }

        let access_token = file
            .access_token
            .or_else(|| cli.access_token.clone())
            .filter(|t| !t.trim().is_empty());

        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);
        if request_timeout_sec == 0 {
            bail!("request_timeout_sec must be greater than zero");
        }

        let manual_tempo = file.manual_tempo.or(cli.manual_tempo);
        let mode = match file.mode.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("manual") => TempoMode::Manual {
                bpm: manual_tempo.unwrap_or(DEFAULT_MANUAL_TEMPO),
            },
            Some("dynamic") => TempoMode::Dynamic,
            Some(other) => bail!("Unknown mode '{}', expected 'manual' or 'dynamic'", other),
            None => match manual_tempo {
                Some(bpm) => TempoMode::Manual { bpm },
                None => TempoMode::Dynamic,
            },
        };

        let genres = file.genres.unwrap_or_else(|| cli.genres.clone());
        let preferences = TrackingPreferences::new(mode, genres)?;

        // Feature settings - merge file config with defaults
        let matching_file = file.matching.unwrap_or_default();
        let matching_defaults = MatchingSettings::default();
        let matching = MatchingSettings {
            tempo_below: matching_file
                .tempo_below
                .unwrap_or(matching_defaults.tempo_below),
            tempo_above: matching_file
                .tempo_above
                .unwrap_or(matching_defaults.tempo_above),
            min_danceability: matching_file
                .min_danceability
                .unwrap_or(matching_defaults.min_danceability),
            target_danceability_min: matching_file
                .target_danceability_min
                .unwrap_or(matching_defaults.target_danceability_min),
            target_danceability_max: matching_file
                .target_danceability_max
                .unwrap_or(matching_defaults.target_danceability_max),
            recommendation_limit: matching_file
                .recommendation_limit
                .unwrap_or(matching_defaults.recommendation_limit),
        };
        matching.validate()?;

        let reconciler_file = file.reconciler.unwrap_or_default();
        let reconciler_defaults = ReconcilerSettings::default();
        let reconciler = ReconcilerSettings {
            poll_interval: reconciler_file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(reconciler_defaults.poll_interval),
            lookahead: reconciler_file
                .lookahead
                .unwrap_or(reconciler_defaults.lookahead),
            smoothing_window: reconciler_file
                .smoothing_window
                .unwrap_or(reconciler_defaults.smoothing_window),
            command_buffer: reconciler_file
                .command_buffer
                .unwrap_or(reconciler_defaults.command_buffer),
        };
        reconciler.validate()?;

        let background_file = file.background.unwrap_or_default();
        let background_defaults = BackgroundSettings::default();
        let background = BackgroundSettings {
            safety_margin: background_file
                .safety_margin_ms
                .map(Duration::from_millis)
                .unwrap_or(background_defaults.safety_margin),
            max_elapsed: background_file
                .max_elapsed_ms
                .map(Duration::from_millis)
                .unwrap_or(background_defaults.max_elapsed),
            poll_interval: background_file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(background_defaults.poll_interval),
        };
        background.validate()?;

        Ok(Self {
            api_base_url,
            access_token,
            request_timeout_sec,
            preferences,
            matching,
            reconciler,
            background,
        })
    }
}

/// How candidates are matched against the tempo target.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingSettings {
    /// Accepted range starts this many BPM below the target.
    pub tempo_below: f64,
    /// Accepted range ends this many BPM above the target.
    pub tempo_above: f64,
    pub min_danceability: f64,
    /// Target danceability is drawn from `[min, max)` for every request.
    pub target_danceability_min: f64,
    pub target_danceability_max: f64,
    pub recommendation_limit: u32,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            tempo_below: 1.5,
            tempo_above: 2.0,
            min_danceability: 0.55,
            target_danceability_min: 0.75,
            target_danceability_max: 1.0,
            recommendation_limit: 10,
        }
    }
}

impl MatchingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.tempo_below < 0.0 || self.tempo_above < 0.0 {
            bail!("Tempo range offsets must not be negative");
        }
        for (name, value) in [
            ("min_danceability", self.min_danceability),
            ("target_danceability_min", self.target_danceability_min),
            ("target_danceability_max", self.target_danceability_max),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if self.target_danceability_min >= self.target_danceability_max {
            bail!(
                "target_danceability_min ({}) must be lower than target_danceability_max ({})",
                self.target_danceability_min,
                self.target_danceability_max
            );
        }
        if self.recommendation_limit == 0 {
            bail!("recommendation_limit must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerSettings {
    /// Period of the "do we need a track" check while tracking.
    pub poll_interval: Duration,
    /// Refill while the internal queue holds fewer tracks than this.
    /// One means "only when empty".
    pub lookahead: usize,
    /// Number of readings averaged by the cadence sampler.
    pub smoothing_window: usize,
    pub command_buffer: usize,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lookahead: 1,
            smoothing_window: 1,
            command_buffer: 64,
        }
    }
}

impl ReconcilerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            bail!("reconciler poll interval must be greater than zero");
        }
        if self.lookahead == 0 {
            bail!("lookahead must be at least 1");
        }
        if self.smoothing_window == 0 {
            bail!("smoothing_window must be at least 1");
        }
        if self.command_buffer == 0 {
            bail!("command_buffer must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundSettings {
    /// Stop once the host reports less remaining time than this.
    pub safety_margin: Duration,
    /// Hard cap on time spent per background activation.
    pub max_elapsed: Duration,
    pub poll_interval: Duration,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(1),
            max_elapsed: Duration::from_secs(25),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl BackgroundSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_elapsed.is_zero() {
            bail!("background max_elapsed must be greater than zero");
        }
        if self.safety_margin >= self.max_elapsed {
            bail!(
                "background safety margin ({:?}) must be shorter than max_elapsed ({:?})",
                self.safety_margin,
                self.max_elapsed
            );
        }
        if self.poll_interval.is_zero() {
            bail!("background poll interval must be greater than zero");
        }
        Ok(())
    }
}

fn validate_manual_tempo(bpm: f64) -> Result<()> {
    if !bpm.is_finite() || bpm <= 0.0 {
        bail!("Manual tempo must be a positive number, got {}", bpm);
    }
    Ok(())
}

/// Trim, lowercase and deduplicate genre seeds, keeping their order.
fn normalize_genres(genres: Vec<String>) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(genres.len());
    for genre in genres {
        let genre = genre.trim().to_ascii_lowercase();
        if genre.is_empty() || normalized.contains(&genre) {
            continue;
        }
        normalized.push(genre);
    }
    if normalized.len() > MAX_GENRE_SEEDS {
        bail!(
            "At most {} genres can be selected, got {}",
            MAX_GENRE_SEEDS,
            normalized.len()
        );
    }
    Ok(normalized)
}
