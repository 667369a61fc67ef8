use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::session::ProxyShared;
use crate::channel::Channel;
use crate::config::TransportConfig;
use crate::error::ChannelError;
use crate::identify::SessionOptions;
use crate::protocol::{keys, CommandStatus, Request, StatusPush, WireMessage};

type Routes = DashMap<String, Weak<ProxyShared>>;

/// Client end of the relay protocol
///
/// Wraps a raw `Channel` with timeouts and typed commands, and routes
/// `status` pushes to the proxy that owns the remote session. Many proxies
/// can share one client (and so one channel). The channel is closed once the
/// last proxy using it has ended.
pub struct SessionClient {
    channel: Arc<dyn Channel>,
    routes: Arc<Routes>,
    /// Proxies that have started using the channel and not yet ended
    active: AtomicUsize,
    open_lock: Mutex<()>,
    /// Bumped on every successful open; remote ids from older generations are dead
    generation: AtomicU64,
    open_timeout: Duration,
    request_timeout: Duration,
    router: JoinHandle<()>,
}

impl SessionClient {
    /// Must be called from within a tokio runtime (spawns the push router)
    pub fn new(
        channel: Arc<dyn Channel>,
        open_timeout: Duration,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        channel.register_push_sink(push_tx);

        let routes = Arc::new(Routes::new());
        let router = tokio::spawn(route_pushes(push_rx, Arc::clone(&routes)));

        Arc::new(Self {
            channel,
            routes,
            active: AtomicUsize::new(0),
            open_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            open_timeout,
            request_timeout,
            router,
        })
    }

    pub fn from_config(channel: Arc<dyn Channel>, config: &TransportConfig) -> Arc<Self> {
        Self::new(channel, config.open_timeout(), config.request_timeout())
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of remote sessions pushes are currently routed for
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Number of proxies currently using the channel
    pub fn active_proxies(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Register a proxy as a user of the channel. Call before `open`.
    pub(crate) fn acquire(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop a proxy's claim on the channel, closing it if nobody is left.
    ///
    /// The count is checked again under the open lock, so a proxy that
    /// acquired in the meantime either keeps the channel or reopens it.
    pub(crate) async fn release(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }

        let _guard = self.open_lock.lock().await;
        if self.active.load(Ordering::SeqCst) == 0 && self.channel.is_open() {
            debug!("Last proxy released the channel");
            self.close().await;
        }
    }

    /// Stop routing pushes for a remote session the proxy gave up on
    pub(crate) fn forget_route(&self, session_id: &str) {
        if self.routes.remove(session_id).is_some() {
            debug!("Forgot route for remote session {}", session_id);
        }
    }

    /// Open the channel if it is not already open
    pub async fn open(&self) -> Result<(), ChannelError> {
        let _guard = self.open_lock.lock().await;
        if self.channel.is_open() {
            return Ok(());
        }

        let opened = timeout(self.open_timeout, self.channel.open())
            .await
            .map_err(|_| ChannelError::Timeout(self.open_timeout))??;
        if !opened {
            return Err(ChannelError::OpenFailed("peer refused the connection".to_string()));
        }

        // A fresh channel implies every remote session is gone
        self.routes.clear();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        info!("Channel open (generation {})", generation);
        Ok(())
    }

    pub async fn close(&self) {
        self.channel.close().await;
        self.routes.clear();
        info!("Channel closed");
    }

    /// Start a remote session whose pushes are routed to `proxy`.
    ///
    /// Returns `None` if the dispatcher answered `fail`.
    pub(crate) async fn start_session(
        &self,
        proxy: &Arc<ProxyShared>,
        options: SessionOptions,
    ) -> Result<Option<String>, ChannelError> {
        let response = self.request(Request::StartSession { options }).await?;

        match response.command_status()? {
            CommandStatus::Ok => {
                let session_id = response.text(keys::SESSION_ID)?.to_string();
                self.routes.insert(session_id.clone(), Arc::downgrade(proxy));

                info!(
                    "Started remote session {} for proxy {}",
                    session_id,
                    proxy.local_id()
                );
                Ok(Some(session_id))
            }
            CommandStatus::Fail => {
                warn!("Dispatcher refused to start a session");
                Ok(None)
            }
        }
    }

    pub async fn send_audio_sample(
        &self,
        session_id: &str,
        sample: Option<Vec<u8>>,
    ) -> Result<CommandStatus, ChannelError> {
        let request = Request::AddSample {
            session_id: session_id.to_string(),
            sample,
        };

        self.request(request).await?.command_status()
    }

    /// End a remote session and stop routing its pushes
    pub async fn end_session(&self, session_id: &str) -> Result<CommandStatus, ChannelError> {
        let request = Request::EndSession {
            session_id: session_id.to_string(),
        };
        let result = match self.request(request).await {
            Ok(response) => response.command_status(),
            Err(e) => Err(e),
        };

        self.forget_route(session_id);

        result
    }

    async fn request(&self, request: Request) -> Result<WireMessage, ChannelError> {
        if !self.channel.is_open() {
            return Err(ChannelError::NotOpen);
        }

        let command = request.command();
        let message = request.into_message()?;

        match timeout(self.request_timeout, self.channel.send_request(message)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} timed out after {:?}", command, self.request_timeout);
                Err(ChannelError::Timeout(self.request_timeout))
            }
        }
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

/// Deliver `status` pushes to the proxy owning the session id
async fn route_pushes(mut pushes: mpsc::UnboundedReceiver<WireMessage>, routes: Arc<Routes>) {
    while let Some(message) = pushes.recv().await {
        let push = match StatusPush::from_message(&message) {
            Ok(push) => push,
            Err(e) => {
                warn!("Ignoring push: {}", e);
                continue;
            }
        };

        let target = routes
            .get(&push.session_id)
            .and_then(|proxy| proxy.upgrade());

        match target {
            Some(proxy) => proxy.process_track_response(push.status, push.tracks).await,
            None => debug!("No proxy for session {}, dropping push", push.session_id),
        }
    }
}
