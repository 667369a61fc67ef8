use std::time::Duration;

use thiserror::Error;

use crate::protocol::Command;

/// Failure of the channel instance itself.
///
/// Any of these sends a proxy down its recovery path: close the channel,
/// drop unsent audio, reopen on the next sample.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not open")]
    NotOpen,

    #[error("failed to open channel: {0}")]
    OpenFailed(String),

    #[error("channel operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service reported a transport failure")]
    ServiceFailed,

    #[error("response is missing the command status")]
    MissingCommandStatus,

    #[error("invalid command status: {0:?}")]
    InvalidCommandStatus(String),

    #[error("malformed message: {0}")]
    Malformed(#[from] ProtocolError),
}

/// A message that does not follow the wire protocol.
///
/// The dispatcher answers these with an ordinary `fail` status.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message has no command")]
    MissingCommand,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("command {0} is not accepted here")]
    UnexpectedCommand(Command),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("field {0} has the wrong type")]
    WrongType(String),

    #[error("invalid status code: {0}")]
    InvalidStatus(i64),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(i64),

    #[error("invalid base64 payload: {0}")]
    InvalidBytes(#[from] base64::DecodeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a session factory could not produce a session
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported session options: {0}")]
    UnsupportedOptions(String),
}

/// Failure reported by a proxy session's drain worker
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("remote rejected {0}")]
    Rejected(Command),

    #[error("drain worker stopped abnormally: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl ProxyError {
    /// Whether this failure invalidates the current channel instance
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, ProxyError::Channel(_))
    }
}
