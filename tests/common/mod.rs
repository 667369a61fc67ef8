// Shared helpers for the integration tests
//
// Builds loopback relays and a channel wrapper that injects transport
// failures at a chosen point.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use audioid_relay::protocol::Command;
use audioid_relay::{
    Channel, ChannelError, IdentifyStatus, LoopbackChannel, PushReceiver, PushSink,
    ProxySessionFactory, ScriptedSessionFactory, SessionClient, SessionDispatcher,
    StatusPush, WireMessage,
};
use tokio::sync::watch;

pub const WAIT: Duration = Duration::from_secs(5);

/// One 4096-byte frame of 16-bit silence
pub fn silent_frame() -> Vec<u8> {
    vec![0u8; 4096]
}

/// Where `FlakyChannel` breaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Reliable,
    /// The peer drops the connection right after answering the first sample
    DropAfterFirstSample,
    /// The first sample never reaches the peer
    FailFirstSample,
}

/// Loopback channel that counts traffic and breaks once on demand
pub struct FlakyChannel {
    inner: LoopbackChannel,
    mode: FailureMode,
    tripped: AtomicBool,
    requests: AtomicUsize,
    responses: AtomicUsize,
    starts: AtomicUsize,
}

impl FlakyChannel {
    pub fn new(factory: Arc<ScriptedSessionFactory>, mode: FailureMode) -> Self {
        Self {
            inner: LoopbackChannel::new(factory),
            mode,
            tripped: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
            responses: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
        }
    }

    pub fn opens(&self) -> usize {
        self.inner.open_count()
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn responses(&self) -> usize {
        self.responses.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub async fn dispatcher(&self) -> Option<Arc<SessionDispatcher>> {
        self.inner.dispatcher().await
    }

    fn trip(&self, mode: FailureMode) -> bool {
        self.mode == mode && !self.tripped.swap(true, Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for FlakyChannel {
    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn open(&self) -> Result<bool, ChannelError> {
        self.inner.open().await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    async fn send_request(&self, message: WireMessage) -> Result<WireMessage, ChannelError> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let command = message.command_name().and_then(Command::parse);
        if command == Some(Command::StartSession) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        let is_sample = command == Some(Command::AddSample);

        if is_sample && self.trip(FailureMode::FailFirstSample) {
            return Err(ChannelError::Transport("injected failure".to_string()));
        }

        let response = self.inner.send_request(message).await?;
        self.responses.fetch_add(1, Ordering::SeqCst);

        if is_sample && self.trip(FailureMode::DropAfterFirstSample) {
            self.inner.close().await;
        }

        Ok(response)
    }

    fn register_push_sink(&self, sink: PushSink) {
        self.inner.register_push_sink(sink)
    }
}

/// Proxy factory over a loopback relay backed by `backend`
pub fn loopback_proxies(
    backend: Arc<ScriptedSessionFactory>,
) -> (Arc<LoopbackChannel>, ProxySessionFactory) {
    let channel = Arc::new(LoopbackChannel::new(backend));
    let client = SessionClient::new(channel.clone(), WAIT, WAIT);
    (channel, ProxySessionFactory::new(client))
}

/// Proxy factory over a `FlakyChannel`
pub fn flaky_proxies(
    backend: Arc<ScriptedSessionFactory>,
    mode: FailureMode,
) -> (Arc<FlakyChannel>, ProxySessionFactory) {
    let channel = Arc::new(FlakyChannel::new(backend, mode));
    let client = SessionClient::new(channel.clone(), WAIT, WAIT);
    (channel, ProxySessionFactory::new(client))
}

/// Wait until a watched status reaches `target`
pub async fn wait_for_status(
    mut status: watch::Receiver<IdentifyStatus>,
    target: IdentifyStatus,
) -> Result<()> {
    tokio::time::timeout(WAIT, status.wait_for(|status| *status == target))
        .await
        .with_context(|| format!("timed out waiting for {}", target))?
        .context("status channel closed")?;
    Ok(())
}

/// Next push from a dispatcher, decoded
pub async fn next_push(pushes: &mut PushReceiver) -> Result<StatusPush> {
    let message = tokio::time::timeout(WAIT, pushes.recv())
        .await
        .context("timed out waiting for a push")?
        .context("push channel closed")?;
    Ok(StatusPush::from_message(&message)?)
}

/// Loopback channel whose opens and session starts take a while
pub struct SlowChannel {
    inner: LoopbackChannel,
    open_delay: Duration,
    start_delay: Duration,
}

impl SlowChannel {
    pub fn new(
        factory: Arc<ScriptedSessionFactory>,
        open_delay: Duration,
        start_delay: Duration,
    ) -> Self {
        Self {
            inner: LoopbackChannel::new(factory),
            open_delay,
            start_delay,
        }
    }

    pub fn opens(&self) -> usize {
        self.inner.open_count()
    }

    pub async fn dispatcher(&self) -> Option<Arc<SessionDispatcher>> {
        self.inner.dispatcher().await
    }
}

#[async_trait]
impl Channel for SlowChannel {
    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn open(&self) -> Result<bool, ChannelError> {
        tokio::time::sleep(self.open_delay).await;
        self.inner.open().await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    async fn send_request(&self, message: WireMessage) -> Result<WireMessage, ChannelError> {
        if message.command_name().and_then(Command::parse) == Some(Command::StartSession) {
            tokio::time::sleep(self.start_delay).await;
        }
        self.inner.send_request(message).await
    }

    fn register_push_sink(&self, sink: PushSink) {
        self.inner.register_push_sink(sink)
    }
}

/// Proxy factory over a `SlowChannel`
pub fn slow_proxies(
    backend: Arc<ScriptedSessionFactory>,
    open_delay: Duration,
    start_delay: Duration,
) -> (Arc<SlowChannel>, ProxySessionFactory) {
    let channel = Arc::new(SlowChannel::new(backend, open_delay, start_delay));
    let client = SessionClient::new(channel.clone(), WAIT, WAIT);
    (channel, ProxySessionFactory::new(client))
}
