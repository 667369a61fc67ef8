use serde::{Deserialize, Serialize};

/// A matched song, as reported by an identification backend
///
/// Embedded in wire messages as a JSON string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Track {
    /// Backend-specific track identifier
    pub identifier: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub cover_art_uri: Option<String>,
    /// Backend-defined confidence (score, percentage, or label)
    pub match_confidence: String,
    /// Track length in milliseconds
    pub duration_ms: u32,
    /// Offset into the track where the match was found
    pub match_position_ms: u32,
    /// Estimated playback position at the time of the match
    pub current_position_ms: u32,
}

impl Track {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
