use std::collections::VecDeque;

use crate::catalog::Track;

/// Tracks this system asked the playback engine to play, oldest first.
///
/// Not the engine's full queue. URIs are unique within the queue.
#[derive(Debug, Clone, Default)]
pub struct InternalQueue {
    tracks: VecDeque<Track>,
}

impl InternalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a track. Returns `false` and leaves the queue unchanged when
    /// the URI is already queued.
    pub fn push(&mut self, track: Track) -> bool {
        if self.contains(&track.uri) {
            return false;
        }
        self.tracks.push_back(track);
        true
    }

    pub fn head(&self) -> Option<&Track> {
        self.tracks.front()
    }

    pub fn remove_head(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.tracks.iter().any(|t| t.uri == uri)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }
}
