use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::error::FactoryError;
use crate::identify::{
    new_session_id, IdentifySession, IdentifyStatus, SessionFactory, SessionOptions,
    StatusChanged, StatusNotifier, Track,
};

/// Factory for `ScriptedSession`s
///
/// Every session it creates is also kept, so tests can inspect what the
/// dispatcher did with them.
pub struct ScriptedSessionFactory {
    frames_needed: usize,
    track_count: usize,
    outcome: IdentifyStatus,
    sample_delay: Option<Duration>,
    reject_sessions: AtomicBool,
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
}

impl ScriptedSessionFactory {
    /// Sessions complete after `frames_needed` non-empty samples, or on finalize
    pub fn new(frames_needed: usize) -> Self {
        Self {
            frames_needed,
            track_count: 1,
            outcome: IdentifyStatus::Complete,
            sample_delay: None,
            reject_sessions: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_track_count(mut self, track_count: usize) -> Self {
        self.track_count = track_count;
        self
    }

    /// Sessions end in `Error` instead of `Complete`
    pub fn failing_with_error(mut self) -> Self {
        self.outcome = IdentifyStatus::Error;
        self
    }

    /// Every sample takes `delay` to process, like a backend doing real work
    pub fn with_sample_delay(mut self, delay: Duration) -> Self {
        self.sample_delay = Some(delay);
        self
    }

    /// Refuse (or accept again) new sessions
    pub fn set_reject_sessions(&self, reject: bool) {
        self.reject_sessions.store(reject, Ordering::SeqCst);
    }

    /// Every session created so far, oldest first
    pub async fn sessions(&self) -> Vec<Arc<ScriptedSession>> {
        self.sessions.lock().await.clone()
    }
}

#[async_trait]
impl SessionFactory for ScriptedSessionFactory {
    async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<dyn IdentifySession>, FactoryError> {
        if self.reject_sessions.load(Ordering::SeqCst) {
            return Err(FactoryError::Unavailable(
                "scripted backend is rejecting sessions".to_string(),
            ));
        }
        if options.bytes_per_second() == 0 {
            return Err(FactoryError::UnsupportedOptions(format!("{:?}", options)));
        }

        let session = Arc::new(ScriptedSession::new(
            options,
            self.frames_needed,
            self.track_count,
            self.outcome,
            self.sample_delay,
        ));
        self.sessions.lock().await.push(Arc::clone(&session));

        let session: Arc<dyn IdentifySession> = session;
        Ok(session)
    }
}

#[derive(Default)]
struct Progress {
    frames: usize,
    bytes: u64,
    /// First byte of every non-empty frame, in arrival order
    markers: Vec<u8>,
    tracks: Vec<Track>,
}

/// Backend session that "identifies" audio after a fixed number of frames
pub struct ScriptedSession {
    session_id: String,
    options: SessionOptions,
    frames_needed: usize,
    track_count: usize,
    outcome: IdentifyStatus,
    sample_delay: Option<Duration>,
    notifier: StatusNotifier,
    progress: Mutex<Progress>,
    ended: AtomicBool,
}

impl ScriptedSession {
    fn new(
        options: SessionOptions,
        frames_needed: usize,
        track_count: usize,
        outcome: IdentifyStatus,
        sample_delay: Option<Duration>,
    ) -> Self {
        let session_id = new_session_id();
        let notifier = StatusNotifier::new(session_id.clone());

        Self {
            session_id,
            options,
            frames_needed,
            track_count,
            outcome,
            sample_delay,
            notifier,
            progress: Mutex::new(Progress::default()),
            ended: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Non-empty samples received so far
    pub async fn frames_received(&self) -> usize {
        self.progress.lock().await.frames
    }

    /// First byte of each non-empty frame received, oldest first
    pub async fn frame_markers(&self) -> Vec<u8> {
        self.progress.lock().await.markers.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Jump straight to `status`, bypassing the script
    pub fn force_status(&self, status: IdentifyStatus) -> bool {
        self.notifier.update(status)
    }

    fn heard_ms(&self, bytes: u64) -> u32 {
        let millis = (bytes * 1000)
            .checked_div(self.options.bytes_per_second())
            .unwrap_or(0);
        u32::try_from(millis).unwrap_or(u32::MAX)
    }

    fn generate_tracks(&self, bytes: u64) -> Vec<Track> {
        let heard_ms = self.heard_ms(bytes);

        (1..=self.track_count)
            .map(|n| Track {
                identifier: uuid::Uuid::new_v4().to_string(),
                title: format!("Scripted Track {}", n),
                artist: "Scripted Artist".to_string(),
                album: "Scripted Album".to_string(),
                genre: "Test".to_string(),
                cover_art_uri: None,
                match_confidence: format!("{}", 100 - n.min(99)),
                duration_ms: 180_000 + 1_000 * n as u32,
                match_position_ms: heard_ms,
                current_position_ms: heard_ms,
            })
            .collect()
    }

    fn finish(&self, progress: &mut Progress) {
        if self.outcome == IdentifyStatus::Complete {
            // Tracks must be in place before anyone sees Complete
            progress.tracks = self.generate_tracks(progress.bytes);
        }

        if self.notifier.update(self.outcome) {
            info!(
                "Scripted session {} finished as {} after {} frames",
                self.session_id, self.outcome, progress.frames
            );
        }
    }
}

#[async_trait]
impl IdentifySession for ScriptedSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn status(&self) -> IdentifyStatus {
        self.notifier.status()
    }

    fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.notifier.subscribe()
    }

    async fn add_audio_sample(&self, sample: Option<Vec<u8>>) {
        if self.is_ended() || self.notifier.status().is_terminal() {
            debug!("Scripted session {} ignoring sample", self.session_id);
            return;
        }

        if let Some(delay) = self.sample_delay {
            tokio::time::sleep(delay).await;
        }

        let mut progress = self.progress.lock().await;
        self.notifier.update(IdentifyStatus::Incomplete);

        match sample {
            Some(bytes) if !bytes.is_empty() => {
                progress.frames += 1;
                progress.markers.push(bytes[0]);
                progress.bytes += bytes.len() as u64;
                if progress.frames < self.frames_needed {
                    return;
                }
            }
            _ => debug!("Scripted session {} finalizing", self.session_id),
        }

        self.finish(&mut progress);
    }

    async fn tracks(&self) -> Vec<Track> {
        self.progress.lock().await.tracks.clone()
    }

    async fn end(&self) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            debug!("Scripted session {} ended", self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_after_enough_frames() {
        let factory = ScriptedSessionFactory::new(3).with_track_count(2);
        let session = factory
            .create_session(SessionOptions::default())
            .await
            .unwrap();
        let mut events = session.subscribe();

        for _ in 0..3 {
            session.add_audio_sample(Some(vec![0u8; 4096])).await;
        }

        assert_eq!(events.recv().await.unwrap().status, IdentifyStatus::Incomplete);
        assert_eq!(events.recv().await.unwrap().status, IdentifyStatus::Complete);
        assert_eq!(session.tracks().await.len(), 2);
    }

    #[tokio::test]
    async fn test_records_frame_markers_in_order() {
        let factory = ScriptedSessionFactory::new(100);
        factory
            .create_session(SessionOptions::default())
            .await
            .unwrap();
        let session = factory.sessions().await[0].clone();

        for marker in [3u8, 1, 2] {
            session.add_audio_sample(Some(vec![marker; 8])).await;
        }
        session.add_audio_sample(Some(Vec::new())).await;

        assert_eq!(session.frame_markers().await, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_empty_sample_finalizes() {
        let factory = ScriptedSessionFactory::new(100);
        let session = factory
            .create_session(SessionOptions::default())
            .await
            .unwrap();

        session.add_audio_sample(Some(vec![1u8; 16])).await;
        assert_eq!(session.status(), IdentifyStatus::Incomplete);

        session.add_audio_sample(Some(Vec::new())).await;
        assert_eq!(session.status(), IdentifyStatus::Complete);

        // Terminal sessions ignore further audio
        session.add_audio_sample(Some(vec![1u8; 16])).await;
        assert_eq!(factory.sessions().await[0].frames_received().await, 1);
    }

    #[tokio::test]
    async fn test_error_outcome_has_no_tracks() {
        let factory = ScriptedSessionFactory::new(1).failing_with_error();
        let session = factory
            .create_session(SessionOptions::default())
            .await
            .unwrap();

        session.add_audio_sample(None).await;

        assert_eq!(session.status(), IdentifyStatus::Error);
        assert!(session.tracks().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejecting_factory() {
        let factory = ScriptedSessionFactory::new(1);
        factory.set_reject_sessions(true);

        assert!(factory.create_session(SessionOptions::default()).await.is_err());

        factory.set_reject_sessions(false);
        assert!(factory.create_session(SessionOptions::default()).await.is_ok());
        assert!(factory
            .create_session(SessionOptions::new(0, 16, 2))
            .await
            .is_err());
    }
}
