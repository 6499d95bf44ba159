//! Wire payloads of the catalog Web API and their validation into domain
//! values.
//!
//! Fields we rely on are required; a payload missing any of them is
//! rejected rather than turned into a partial object. Extra fields are
//! ignored since the API returns far more than we use.

use serde::Deserialize;
use tracing::warn;

use super::{CatalogError, Track, UserProfile};

#[derive(Debug, Deserialize)]
struct RecommendationsPayload {
    tracks: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TrackPayload {
    uri: String,
    name: String,
    duration_ms: u64,
    artists: Vec<ArtistPayload>,
    album: AlbumPayload,
}

#[derive(Debug, Deserialize)]
struct ArtistPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumPayload {
    images: Vec<ImagePayload>,
}

#[derive(Debug, Deserialize)]
struct ImagePayload {
    url: String,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesPayload {
    tempo: f64,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    display_name: String,
    #[serde(default)]
    images: Vec<ImagePayload>,
}

impl TryFrom<TrackPayload> for Track {
    type Error = String;

    fn try_from(payload: TrackPayload) -> Result<Self, Self::Error> {
        if payload.uri.trim().is_empty() {
            return Err("empty uri".to_string());
        }
        let artist = payload
            .artists
            .into_iter()
            .next()
            .map(|a| a.name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| format!("track {} has no artist", payload.uri))?;
        let artwork_url = payload
            .album
            .images
            .into_iter()
            .next()
            .map(|i| i.url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| format!("track {} has no artwork", payload.uri))?;

        Ok(Track {
            uri: payload.uri,
            name: payload.name,
            artist,
            duration_secs: payload.duration_ms / 1000,
            artwork_url,
            tempo: None,
        })
    }
}

/// Parse a `/recommendations` response body.
///
/// Entries that fail validation are skipped. If the response had entries
/// but none of them were usable the whole payload is rejected.
pub fn parse_recommendations(body: &str) -> Result<Vec<Track>, CatalogError> {
    let payload: RecommendationsPayload = serde_json::from_str(body)
        .map_err(|e| CatalogError::MalformedResponse(format!("recommendations: {}", e)))?;

    let total = payload.tracks.len();
    let tracks: Vec<Track> = payload
        .tracks
        .into_iter()
        .filter_map(|value| {
            let parsed = serde_json::from_value::<TrackPayload>(value)
                .map_err(|e| e.to_string())
                .and_then(Track::try_from);
            match parsed {
                Ok(track) => Some(track),
                Err(reason) => {
                    warn!("Skipping invalid recommendation entry: {}", reason);
                    None
                }
            }
        })
        .collect();

    if total > 0 && tracks.is_empty() {
        return Err(CatalogError::MalformedResponse(format!(
            "none of the {} recommended tracks were valid",
            total
        )));
    }

    Ok(tracks)
}

/// Parse an `/audio-features/{id}` response body into a BPM value.
pub fn parse_audio_features(body: &str) -> Result<f64, CatalogError> {
    let payload: AudioFeaturesPayload = serde_json::from_str(body)
        .map_err(|e| CatalogError::MalformedResponse(format!("audio features: {}", e)))?;
    if !payload.tempo.is_finite() || payload.tempo < 0.0 {
        return Err(CatalogError::MalformedResponse(format!(
            "invalid tempo {}",
            payload.tempo
        )));
    }
    Ok(payload.tempo)
}

/// Parse a `/me` response body.
pub fn parse_user_profile(body: &str) -> Result<UserProfile, CatalogError> {
    let payload: UserPayload = serde_json::from_str(body)
        .map_err(|e| CatalogError::MalformedResponse(format!("user profile: {}", e)))?;
    Ok(UserProfile {
        display_name: payload.display_name,
        image_url: payload.images.into_iter().next().map(|i| i.url),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn track_json(uri: &str, duration_ms: u64) -> serde_json::Value {
        json!({
            "uri": uri,
            "name": "Song",
            "duration_ms": duration_ms,
            "explicit": false,
            "artists": [{"name": "Band", "id": "a1"}],
            "album": {"images": [{"url": "https://img/large", "height": 640}]}
        })
    }

    #[test]
    fn test_parse_recommendations() {
        let body = json!({
            "seeds": [],
            "tracks": [track_json("spotify:track:1", 215_999), track_json("spotify:track:2", 180_000)]
        })
        .to_string();

        let tracks = parse_recommendations(&body).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].uri, "spotify:track:1");
        assert_eq!(tracks[0].artist, "Band");
        assert_eq!(tracks[0].duration_secs, 215);
        assert_eq!(tracks[0].artwork_url, "https://img/large");
        assert!(tracks[0].tempo.is_none());
    }

    #[test]
    fn test_empty_track_list_is_valid() {
        let tracks = parse_recommendations(r#"{"tracks": []}"#).unwrap();
        assert!(tracks.is_empty());
    }

    #[test]
    fn test_missing_tracks_array_is_malformed() {
        let err = parse_recommendations(r#"{"items": []}"#).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedResponse(_)));

        let err = parse_recommendations("not json").unwrap_err();
        assert!(matches!(err, CatalogError::MalformedResponse(_)));
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let mut no_artist = track_json("spotify:track:bad", 1000);
        no_artist["artists"] = json!([]);
        let mut no_image = track_json("spotify:track:bad2", 1000);
        no_image["album"]["images"] = json!([]);
        let mut no_uri = track_json("x", 1000);
        no_uri.as_object_mut().unwrap().remove("uri");

        let body = json!({
            "tracks": [no_artist, track_json("spotify:track:ok", 1000), no_image, no_uri]
        })
        .to_string();

        let tracks = parse_recommendations(&body).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].uri, "spotify:track:ok");
    }

    #[test]
    fn test_all_entries_invalid_is_malformed() {
        let body = json!({"tracks": [{"uri": "spotify:track:1"}]}).to_string();
        let err = parse_recommendations(&body).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_audio_features() {
        assert_eq!(
            parse_audio_features(r#"{"tempo": 161.9, "energy": 0.8}"#).unwrap(),
            161.9
        );
        assert!(parse_audio_features(r#"{"energy": 0.8}"#).is_err());
        assert!(parse_audio_features(r#"{"tempo": -3.0}"#).is_err());
    }

    #[test]
    fn test_parse_user_profile() {
        let profile = parse_user_profile(
            r#"{"display_name": "Runner", "images": [{"url": "https://img/me"}]}"#,
        )
        .unwrap();
        assert_eq!(profile.display_name, "Runner");
        assert_eq!(profile.image_url.as_deref(), Some("https://img/me"));

        let profile = parse_user_profile(r#"{"display_name": "NoPic"}"#).unwrap();
        assert!(profile.image_url.is_none());

        assert!(parse_user_profile(r#"{"images": []}"#).is_err());
    }
}
