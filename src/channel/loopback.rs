use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Channel, PushSink};
use crate::dispatcher::SessionDispatcher;
use crate::error::ChannelError;
use crate::identify::SessionFactory;
use crate::protocol::WireMessage;

struct Hosted {
    dispatcher: Arc<SessionDispatcher>,
    push_pump: JoinHandle<()>,
}

/// Channel to a dispatcher hosted in the same process
///
/// Every open creates a fresh dispatcher over the shared factory, so sessions
/// never survive a close, just like a remote service whose connection dropped.
pub struct LoopbackChannel {
    factory: Arc<dyn SessionFactory>,
    hosted: Mutex<Option<Hosted>>,
    open: AtomicBool,
    opened: AtomicUsize,
    sink: OnceLock<PushSink>,
}

impl LoopbackChannel {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            hosted: Mutex::new(None),
            open: AtomicBool::new(false),
            opened: AtomicUsize::new(0),
            sink: OnceLock::new(),
        }
    }

    /// Dispatcher behind the current channel instance, if open
    pub async fn dispatcher(&self) -> Option<Arc<SessionDispatcher>> {
        self.hosted
            .lock()
            .await
            .as_ref()
            .map(|hosted| Arc::clone(&hosted.dispatcher))
    }

    /// How many times the channel has been opened
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for LoopbackChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<bool, ChannelError> {
        let mut hosted = self.hosted.lock().await;
        if hosted.is_some() {
            return Ok(true);
        }

        let (dispatcher, mut pushes) = SessionDispatcher::new(Arc::clone(&self.factory));
        let sink = self.sink.get().cloned();

        let push_pump = tokio::spawn(async move {
            while let Some(message) = pushes.recv().await {
                match &sink {
                    Some(sink) => {
                        if sink.send(message).is_err() {
                            debug!("Push sink dropped");
                            break;
                        }
                    }
                    None => debug!("No push sink registered, dropping push"),
                }
            }
        });

        *hosted = Some(Hosted {
            dispatcher: Arc::new(dispatcher),
            push_pump,
        });
        self.open.store(true, Ordering::SeqCst);
        let count = self.opened.fetch_add(1, Ordering::SeqCst) + 1;

        info!("Opened loopback channel (instance {})", count);
        Ok(true)
    }

    async fn close(&self) {
        let hosted = self.hosted.lock().await.take();
        self.open.store(false, Ordering::SeqCst);

        if let Some(hosted) = hosted {
            hosted.push_pump.abort();
            hosted.dispatcher.shutdown();
            info!("Closed loopback channel");
        }
    }

    async fn send_request(&self, message: WireMessage) -> Result<WireMessage, ChannelError> {
        let dispatcher = self
            .dispatcher()
            .await
            .ok_or(ChannelError::NotOpen)?;

        Ok(dispatcher.process_request(message).await)
    }

    fn register_push_sink(&self, sink: PushSink) {
        if self.sink.set(sink).is_err() {
            warn!("Push sink already registered, ignoring");
        }
    }
}
