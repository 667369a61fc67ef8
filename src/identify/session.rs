use async_trait::async_trait;
use tokio::sync::broadcast;

use super::status::{IdentifyStatus, StatusChanged};
use super::track::Track;

/// One attempt to identify a piece of audio from a stream of PCM samples
///
/// Implemented by every identification backend and by the client-side proxy.
/// Callers never branch on which implementation they hold.
#[async_trait]
pub trait IdentifySession: Send + Sync {
    /// Unique, brace-free session identifier
    fn session_id(&self) -> &str;

    /// Current identification status
    fn status(&self) -> IdentifyStatus;

    /// Subscribe to status changes (one event per distinct value)
    fn subscribe(&self) -> broadcast::Receiver<StatusChanged>;

    /// Feed PCM audio
    ///
    /// `None` or an empty buffer means "no more audio, finalize". How a
    /// backend finalizes is up to the backend.
    async fn add_audio_sample(&self, sample: Option<Vec<u8>>);

    /// Tracks matched so far (populated once the status is `Complete`)
    async fn tracks(&self) -> Vec<Track>;

    /// Release the session. Calling this more than once is a no-op.
    async fn end(&self) {}
}

/// Generate a new session identifier (hyphenated UUID, no braces)
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().hyphenated().to_string()
}
