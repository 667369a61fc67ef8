//! Duplex transport between session proxies and a dispatcher
//!
//! A channel carries request/response pairs plus unsolicited push messages
//! from the server. Concrete transports:
//! - `LoopbackChannel` - dispatcher hosted in-process
//! - `NatsChannel` / `NatsDispatchServer` - NATS request/reply

mod loopback;
mod nats;

pub use loopback::LoopbackChannel;
pub use nats::{NatsChannel, NatsDispatchServer, Subjects};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::protocol::WireMessage;

/// Where a channel delivers inbound push messages
pub type PushSink = mpsc::UnboundedSender<WireMessage>;

/// Client end of a duplex channel
///
/// Errors returned here are transport failures. An application-level
/// `fail` comes back as an ordinary response.
#[async_trait]
pub trait Channel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Open the channel; `Ok(false)` means the peer refused
    async fn open(&self) -> Result<bool, ChannelError>;

    async fn close(&self);

    async fn send_request(&self, message: WireMessage) -> Result<WireMessage, ChannelError>;

    /// Register where push messages go. Only the first registration is kept.
    fn register_push_sink(&self, sink: PushSink);
}
