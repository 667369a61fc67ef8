use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Channel, PushSink};
use crate::config::TransportConfig;
use crate::dispatcher::{PushReceiver, SessionDispatcher};
use crate::error::ChannelError;
use crate::identify::SessionFactory;
use crate::protocol::{WireMessage, SERVICE_NAME};

/// NATS subjects used by one relay deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    /// Request/reply subject served by the dispatcher
    pub request: String,
    /// Subject the dispatcher publishes `status` pushes on
    pub push: String,
}

impl Subjects {
    pub fn new(prefix: &str) -> Self {
        Self {
            request: format!("{}.request", prefix),
            push: format!("{}.push", prefix),
        }
    }
}

impl Default for Subjects {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

struct Connection {
    client: async_nats::Client,
    push_task: JoinHandle<()>,
}

/// Client end of the relay over NATS request/reply
///
/// Every client subscribes to the shared push subject; pushes for sessions
/// it does not own are dropped by the session client's router.
pub struct NatsChannel {
    url: String,
    subjects: Subjects,
    connection: Mutex<Option<Connection>>,
    open: Arc<AtomicBool>,
    sink: OnceLock<PushSink>,
}

impl NatsChannel {
    pub fn new(url: impl Into<String>, subjects: Subjects) -> Self {
        Self {
            url: url.into(),
            subjects,
            connection: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            sink: OnceLock::new(),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.nats_url.clone(), Subjects::new(&config.subject_prefix))
    }

    pub fn subjects(&self) -> &Subjects {
        &self.subjects
    }
}

#[async_trait]
impl Channel for NatsChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<bool, ChannelError> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() && self.is_open() {
            return Ok(true);
        }
        if let Some(stale) = connection.take() {
            stale.push_task.abort();
        }

        info!("Connecting to NATS at {}", self.url);

        let client = match async_nats::connect(self.url.as_str()).await {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to connect to NATS at {}: {}", self.url, e);
                return Ok(false);
            }
        };

        let mut pushes = client
            .subscribe(self.subjects.push.clone())
            .await
            .map_err(|e| ChannelError::OpenFailed(e.to_string()))?;

        let sink = self.sink.get().cloned();
        let open = Arc::clone(&self.open);
        let push_subject = self.subjects.push.clone();

        let push_task = tokio::spawn(async move {
            while let Some(msg) = pushes.next().await {
                match WireMessage::from_json_slice(&msg.payload) {
                    Ok(message) => {
                        if let Some(sink) = &sink {
                            if sink.send(message).is_err() {
                                debug!("Push sink dropped");
                                break;
                            }
                        }
                    }
                    Err(e) => warn!("Dropping malformed push: {}", e),
                }
            }

            // Without the push subscription the channel is useless
            warn!("Push subscription on {} ended", push_subject);
            open.store(false, Ordering::SeqCst);
        });

        *connection = Some(Connection { client, push_task });
        self.open.store(true, Ordering::SeqCst);

        info!("Subscribed to {}", self.subjects.push);
        Ok(true)
    }

    async fn close(&self) {
        let connection = self.connection.lock().await.take();
        self.open.store(false, Ordering::SeqCst);

        if let Some(connection) = connection {
            info!("Closing NATS connection");
            connection.push_task.abort();
            // async-nats handles cleanup on drop
        }
    }

    async fn send_request(&self, message: WireMessage) -> Result<WireMessage, ChannelError> {
        let client = self
            .connection
            .lock()
            .await
            .as_ref()
            .map(|connection| connection.client.clone())
            .ok_or(ChannelError::NotOpen)?;

        let payload = message.to_json_bytes()?;

        let reply = client
            .request(self.subjects.request.clone(), payload.into())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        Ok(WireMessage::from_json_slice(&reply.payload)?)
    }

    fn register_push_sink(&self, sink: PushSink) {
        if self.sink.set(sink).is_err() {
            warn!("Push sink already registered, ignoring");
        }
    }
}

/// Serves a `SessionDispatcher` on NATS
pub struct NatsDispatchServer {
    client: async_nats::Client,
    subjects: Subjects,
    dispatcher: Arc<SessionDispatcher>,
    pushes: PushReceiver,
}

impl NatsDispatchServer {
    pub async fn connect(
        url: &str,
        subjects: Subjects,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self> {
        info!("Connecting dispatcher to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        let (dispatcher, pushes) = SessionDispatcher::new(factory);

        Ok(Self {
            client,
            subjects,
            dispatcher: Arc::new(dispatcher),
            pushes,
        })
    }

    pub fn dispatcher(&self) -> Arc<SessionDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Serve requests until the subscription ends
    pub async fn run(self) -> Result<()> {
        let Self {
            client,
            subjects,
            dispatcher,
            mut pushes,
        } = self;

        let mut requests = client
            .subscribe(subjects.request.clone())
            .await
            .context("Failed to subscribe to requests")?;

        info!("Serving requests on {}", subjects.request);

        let push_client = client.clone();
        let push_subject = subjects.push.clone();
        let push_pump = tokio::spawn(async move {
            while let Some(message) = pushes.recv().await {
                let payload = match message.to_json_bytes() {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to encode push: {}", e);
                        continue;
                    }
                };
                if let Err(e) = push_client.publish(push_subject.clone(), payload.into()).await {
                    error!("Failed to publish push: {}", e);
                }
            }
        });

        while let Some(msg) = requests.next().await {
            let Some(reply) = msg.reply.clone() else {
                warn!("Request without reply subject, ignoring");
                continue;
            };

            // A proxy awaits each response before sending its next sample,
            // so per-session ordering holds across these tasks.
            let dispatcher = Arc::clone(&dispatcher);
            let client = client.clone();
            tokio::spawn(async move {
                let response = match WireMessage::from_json_slice(&msg.payload) {
                    Ok(request) => dispatcher.process_request(request).await,
                    Err(e) => {
                        warn!("Malformed request: {}", e);
                        WireMessage::fail()
                    }
                };

                match response.to_json_bytes() {
                    Ok(payload) => {
                        if let Err(e) = client.publish(reply, payload.into()).await {
                            error!("Failed to publish response: {}", e);
                        }
                    }
                    Err(e) => error!("Failed to encode response: {}", e),
                }
            });
        }

        info!("Request subscription ended");
        push_pump.abort();
        dispatcher.shutdown();

        Ok(())
    }
}
