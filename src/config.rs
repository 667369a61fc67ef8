use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::identify::SessionOptions;
use crate::protocol::SERVICE_NAME;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub transport: TransportConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "audioid-relay".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub nats_url: String,
    /// Prefix of the request and push subjects
    pub subject_prefix: String,
    pub open_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl TransportConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            subject_prefix: SERVICE_NAME.to_string(),
            open_timeout_ms: 5_000,
            request_timeout_ms: 15_000,
        }
    }
}

/// Default audio format for new sessions
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u16,
    pub sample_size: u16,
    pub channel_count: u16,
}

impl AudioConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions::new(self.sample_rate, self.sample_size, self.channel_count)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            sample_rate: options.sample_rate(),
            sample_size: options.sample_size(),
            channel_count: options.channel_count(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        settings
            .try_deserialize()
            .with_context(|| format!("Invalid config in {}", path))
    }
}
