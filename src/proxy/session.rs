use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::SessionClient;
use crate::error::ProxyError;
use crate::identify::{
    new_session_id, IdentifySession, IdentifyStatus, SessionOptions, StatusChanged,
    StatusNotifier, Track,
};
use crate::protocol::{Command, CommandStatus};

/// Samples waiting to be forwarded, plus the worker forwarding them
#[derive(Default)]
struct SampleBuffer {
    samples: VecDeque<Option<Vec<u8>>>,
    draining: bool,
    worker: Option<JoinHandle<Result<(), ProxyError>>>,
}

/// Remote session id, tagged with the channel generation it was created on
struct RemoteSession {
    id: String,
    generation: u64,
}

/// What this proxy holds on the client side
#[derive(Default)]
struct RemoteState {
    session: Option<RemoteSession>,
    /// Whether this proxy counts as a user of the shared channel
    engaged: bool,
}

/// State shared between a proxy, its drain worker and the push router
pub(crate) struct ProxyShared {
    local_id: String,
    options: SessionOptions,
    client: Arc<SessionClient>,
    notifier: StatusNotifier,
    tracks: RwLock<Vec<Track>>,
    buffer: Mutex<SampleBuffer>,
    remote: tokio::sync::Mutex<RemoteState>,
    ended: AtomicBool,
}

impl ProxyShared {
    pub(crate) fn local_id(&self) -> &str {
        &self.local_id
    }

    fn lock_buffer(&self) -> MutexGuard<'_, SampleBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a sample and make sure exactly one worker is draining
    fn enqueue(self: &Arc<Self>, sample: Option<Vec<u8>>) {
        if self.ended.load(Ordering::SeqCst) {
            debug!("Proxy session {} already ended, dropping sample", self.local_id);
            return;
        }
        if self.notifier.status() == IdentifyStatus::Complete {
            return;
        }

        let mut buffer = self.lock_buffer();
        buffer.samples.push_back(sample);

        if !buffer.draining {
            buffer.draining = true;
            let shared = Arc::clone(self);
            buffer.worker = Some(tokio::spawn(async move { shared.drain().await }));
        }
    }

    async fn drain(self: Arc<Self>) -> Result<(), ProxyError> {
        let result = self.forward_buffered_samples().await;

        if let Err(e) = &result {
            warn!("Proxy session {} dropped its buffered audio: {}", self.local_id, e);
            if e.is_channel_failure() {
                self.client.close().await;
            }

            let mut buffer = self.lock_buffer();
            buffer.samples.clear();
            buffer.draining = false;
        }

        result
    }

    async fn forward_buffered_samples(self: &Arc<Self>) -> Result<(), ProxyError> {
        loop {
            let sample = {
                let mut buffer = self.lock_buffer();
                // Nothing more to learn once identified
                if self.notifier.status() == IdentifyStatus::Complete {
                    buffer.samples.clear();
                }
                match buffer.samples.pop_front() {
                    Some(sample) => sample,
                    None => {
                        buffer.draining = false;
                        return Ok(());
                    }
                }
            };

            let Some(session_id) = self.ensure_remote_session().await? else {
                debug!("Proxy session {} ended while draining", self.local_id);
                let mut buffer = self.lock_buffer();
                buffer.samples.clear();
                buffer.draining = false;
                return Ok(());
            };

            match self.client.send_audio_sample(&session_id, sample).await? {
                CommandStatus::Ok => {}
                CommandStatus::Fail => {
                    warn!(
                        "Remote session {} refused a sample, starting a new one",
                        session_id
                    );
                    let mut remote = self.remote.lock().await;
                    if remote.session.as_ref().is_some_and(|known| known.id == session_id) {
                        remote.session = None;
                    }
                    self.client.forget_route(&session_id);
                }
            }
        }
    }

    /// Remote session id valid on the current channel instance, opening the
    /// channel and starting a session as needed.
    ///
    /// Returns `None` once the proxy has ended. Holding the `remote` lock
    /// across open and start keeps `end()` from slipping in between.
    async fn ensure_remote_session(self: &Arc<Self>) -> Result<Option<String>, ProxyError> {
        let mut remote = self.remote.lock().await;
        if self.ended.load(Ordering::SeqCst) {
            return Ok(None);
        }

        if !remote.engaged {
            remote.engaged = true;
            self.client.acquire();
        }

        self.client.open().await?;
        if self.ended.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let generation = self.client.generation();
        if let Some(existing) = remote.session.as_ref() {
            if existing.generation == generation {
                return Ok(Some(existing.id.clone()));
            }
            debug!("Remote session {} went away with its channel", existing.id);
        }
        remote.session = None;

        match self.client.start_session(self, self.options).await? {
            Some(id) => {
                remote.session = Some(RemoteSession {
                    id: id.clone(),
                    generation,
                });
                Ok(Some(id))
            }
            None => Err(ProxyError::Rejected(Command::StartSession)),
        }
    }

    pub(crate) async fn process_track_response(&self, status: IdentifyStatus, tracks: Vec<Track>) {
        *self.tracks.write().await = tracks;

        if self.notifier.update(status) {
            info!("Proxy session {} is now {}", self.local_id, status);
        }
    }

    async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }

        self.lock_buffer().samples.clear();

        let (session, engaged) = {
            let mut remote = self.remote.lock().await;
            let engaged = std::mem::take(&mut remote.engaged);
            (remote.session.take(), engaged)
        };

        if let Some(session) = session {
            if session.generation == self.client.generation() {
                match self.client.end_session(&session.id).await {
                    Ok(CommandStatus::Ok) => info!("Ended remote session {}", session.id),
                    Ok(CommandStatus::Fail) => {
                        debug!("Remote session {} was already gone", session.id)
                    }
                    Err(e) => debug!("Could not end remote session {}: {}", session.id, e),
                }
            }
        }

        if engaged {
            self.client.release().await;
        }
    }
}

/// Client-side stand-in for a session hosted behind a channel
///
/// Samples are buffered and forwarded in order by a single background worker;
/// the remote session (and the channel) are created lazily on the first
/// sample and recreated after a channel failure. Status and tracks arrive as
/// pushes from the remote session.
pub struct ProxySession {
    shared: Arc<ProxyShared>,
}

impl ProxySession {
    pub fn new(client: Arc<SessionClient>, options: SessionOptions) -> Self {
        let local_id = new_session_id();
        let notifier = StatusNotifier::new(local_id.clone());

        Self {
            shared: Arc::new(ProxyShared {
                local_id,
                options,
                client,
                notifier,
                tracks: RwLock::new(Vec::new()),
                buffer: Mutex::new(SampleBuffer::default()),
                remote: tokio::sync::Mutex::new(RemoteState::default()),
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> SessionOptions {
        self.shared.options
    }

    /// Samples queued but not yet forwarded
    pub fn pending_samples(&self) -> usize {
        self.shared.lock_buffer().samples.len()
    }

    /// Id of the remote session currently backing this proxy
    pub async fn remote_session_id(&self) -> Option<String> {
        self.shared
            .remote
            .lock()
            .await
            .session
            .as_ref()
            .map(|remote| remote.id.clone())
    }

    /// Apply a status update from the remote session
    pub async fn process_track_response(&self, status: IdentifyStatus, tracks: Vec<Track>) {
        self.shared.process_track_response(status, tracks).await;
    }

    /// Wait until the buffer is drained.
    ///
    /// Returns the error of the drain worker if it gave up.
    pub async fn flush(&self) -> Result<(), ProxyError> {
        loop {
            let worker = self.shared.lock_buffer().worker.take();
            match worker {
                Some(worker) => worker.await??,
                None => return Ok(()),
            }
        }
    }

    pub fn watch_status(&self) -> watch::Receiver<IdentifyStatus> {
        self.shared.notifier.watch()
    }
}

#[async_trait]
impl IdentifySession for ProxySession {
    fn session_id(&self) -> &str {
        &self.shared.local_id
    }

    fn status(&self) -> IdentifyStatus {
        self.shared.notifier.status()
    }

    fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.shared.notifier.subscribe()
    }

    async fn add_audio_sample(&self, sample: Option<Vec<u8>>) {
        self.shared.enqueue(sample);
    }

    async fn tracks(&self) -> Vec<Track> {
        self.shared.tracks.read().await.clone()
    }

    async fn end(&self) {
        self.shared.end().await;
    }
}

impl Drop for ProxySession {
    fn drop(&mut self) {
        if self.shared.ended.load(Ordering::SeqCst) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { shared.end().await });
            }
            Err(_) => debug!("No runtime left to end proxy session {}", shared.local_id),
        }
    }
}
