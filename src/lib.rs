pub mod backend;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identify;
pub mod protocol;
pub mod proxy;

pub use backend::{ScriptedSession, ScriptedSessionFactory};
pub use channel::{Channel, LoopbackChannel, NatsChannel, NatsDispatchServer, PushSink, Subjects};
pub use config::Config;
pub use dispatcher::{DispatcherStats, PushReceiver, SessionDispatcher, SessionSummary};
pub use error::{ChannelError, FactoryError, ProtocolError, ProxyError};
pub use identify::{
    IdentifySession, IdentifyStatus, SessionFactory, SessionOptions, StatusChanged, Track,
};
pub use protocol::{Command, CommandStatus, Request, StatusPush, WireMessage, WireValue};
pub use proxy::{ProxySession, ProxySessionFactory, SessionClient};
