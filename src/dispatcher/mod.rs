//! Server-side session dispatcher
//!
//! Terminates the wire protocol and owns the backend sessions:
//! - `startSession` asks the factory for a session and registers it
//! - `addSample` / `endSession` are routed by session id
//! - backend status changes become `status` push messages
//!
//! Commands for different sessions run concurrently; commands for the same
//! session run in arrival order.

mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::identify::{IdentifySession, IdentifyStatus, SessionFactory, SessionOptions, StatusChanged};
use crate::protocol::{keys, Request, StatusPush, WireMessage};

use registry::SessionRegistry;
pub use registry::SessionSummary;

/// Receiving end of the dispatcher's push messages
pub type PushReceiver = mpsc::UnboundedReceiver<WireMessage>;

/// Counters describing a dispatcher's lifetime
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub active_sessions: usize,
    pub commands_handled: u64,
    pub commands_failed: u64,
    pub started_at: DateTime<Utc>,
}

pub struct SessionDispatcher {
    factory: Arc<dyn SessionFactory>,
    registry: Arc<SessionRegistry>,
    push_tx: mpsc::UnboundedSender<WireMessage>,
    commands_handled: AtomicU64,
    commands_failed: AtomicU64,
    started_at: DateTime<Utc>,
}

impl SessionDispatcher {
    /// Create a dispatcher and the receiver its push messages are emitted on
    pub fn new(factory: Arc<dyn SessionFactory>) -> (Self, PushReceiver) {
        let (push_tx, push_rx) = mpsc::unbounded_channel();

        let dispatcher = Self {
            factory,
            registry: Arc::new(SessionRegistry::new()),
            push_tx,
            commands_handled: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            started_at: Utc::now(),
        };

        (dispatcher, push_rx)
    }

    pub fn active_session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.registry.summaries()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            active_sessions: self.registry.len(),
            commands_handled: self.commands_handled.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }

    /// Handle one client request and build its response.
    ///
    /// Malformed or unknown commands are answered with `fail`; they never
    /// take the dispatcher down.
    pub async fn process_request(&self, message: WireMessage) -> WireMessage {
        self.commands_handled.fetch_add(1, Ordering::Relaxed);

        let response = match Request::from_message(&message) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!("Rejecting request: {}", e);
                WireMessage::fail()
            }
        };

        if !matches!(response.command_status(), Ok(status) if status.is_ok()) {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }

        response
    }

    async fn handle(&self, request: Request) -> WireMessage {
        match request {
            Request::StartSession { options } => self.start_session(options).await,
            Request::AddSample { session_id, sample } => self.add_sample(&session_id, sample).await,
            Request::EndSession { session_id } => self.end_session(&session_id).await,
        }
    }

    async fn start_session(&self, options: SessionOptions) -> WireMessage {
        let session = match self.factory.create_session(options).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Session factory failed: {}", e);
                return WireMessage::fail();
            }
        };

        let session_id = session.session_id().to_string();

        // Subscribe before registering so no status change is missed
        let events = session.subscribe();
        self.registry.insert(session_id.clone(), Arc::clone(&session));

        let task = tokio::spawn(forward_status_events(
            Arc::clone(&self.registry),
            session,
            events,
            self.push_tx.clone(),
        ));
        self.registry.attach_subscription(&session_id, task);

        info!(
            "Opened session {} ({} active)",
            session_id,
            self.registry.len()
        );

        WireMessage::ok().with(keys::SESSION_ID, session_id)
    }

    async fn add_sample(&self, session_id: &str, sample: Option<Vec<u8>>) -> WireMessage {
        let Some((session, gate)) = self.registry.lookup(session_id) else {
            warn!("Sample for unknown session {}", session_id);
            return WireMessage::fail();
        };

        let _turn = gate.lock().await;
        session.add_audio_sample(sample).await;

        WireMessage::ok()
    }

    async fn end_session(&self, session_id: &str) -> WireMessage {
        let Some((session, gate)) = self.registry.remove(session_id) else {
            warn!("End for unknown session {}", session_id);
            return WireMessage::fail();
        };

        // Let samples already queued for this session land first
        let _turn = gate.lock().await;
        session.end().await;

        info!(
            "Removed session {} ({} active)",
            session_id,
            self.registry.len()
        );

        WireMessage::ok()
    }

    /// Unsubscribe from and forget every registered session.
    ///
    /// Backend sessions are not ended; their lifetime belongs to whoever
    /// still holds them.
    pub fn shutdown(&self) {
        let count = self.registry.clear();
        if count > 0 {
            info!("Dispatcher shut down with {} active sessions", count);
        }
    }
}

impl Drop for SessionDispatcher {
    fn drop(&mut self) {
        self.registry.clear();
    }
}

/// Turn a backend session's status events into `status` push messages
async fn forward_status_events(
    registry: Arc<SessionRegistry>,
    session: Arc<dyn IdentifySession>,
    mut events: broadcast::Receiver<StatusChanged>,
    push_tx: mpsc::UnboundedSender<WireMessage>,
) {
    loop {
        let status = match events.recv().await {
            Ok(event) => event.status,
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    "Session {} status events lagged by {}",
                    session.session_id(),
                    skipped
                );
                session.status()
            }
            Err(RecvError::Closed) => break,
        };

        let tracks = if status == IdentifyStatus::Complete {
            session.tracks().await
        } else {
            Vec::new()
        };

        // Removed while fetching tracks
        if !registry.contains(session.session_id()) {
            break;
        }

        let push = StatusPush {
            session_id: session.session_id().to_string(),
            status,
            tracks,
        };

        match push.into_message() {
            Ok(message) => {
                debug!("Push status {} for {}", status, session.session_id());
                if push_tx.send(message).is_err() {
                    debug!("Push receiver dropped, stop forwarding");
                    break;
                }
            }
            Err(e) => error!("Failed to encode status push: {}", e),
        }
    }
}
