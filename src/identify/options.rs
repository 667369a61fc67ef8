use serde::{Deserialize, Serialize};

/// Audio format of the PCM samples fed to a session
///
/// Immutable once constructed; serialized as camelCase JSON when it crosses
/// the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Samples per second
    sample_rate: u16,
    /// Bits per sample
    sample_size: u16,
    /// Interleaved channel count
    channel_count: u16,
}

impl SessionOptions {
    pub fn new(sample_rate: u16, sample_size: u16, channel_count: u16) -> Self {
        Self {
            sample_rate,
            sample_size,
            channel_count,
        }
    }

    pub fn sample_rate(&self) -> u16 {
        self.sample_rate
    }

    pub fn sample_size(&self) -> u16 {
        self.sample_size
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Bytes of PCM per second of audio, 0 for a degenerate format
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.channel_count) * u64::from(self.sample_size) / 8
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100, // CD quality
            sample_size: 16,
            channel_count: 2, // Stereo
        }
    }
}
