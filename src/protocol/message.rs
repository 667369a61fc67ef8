use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::schema::{keys, Command, CommandStatus};
use crate::error::{ChannelError, ProtocolError};

/// A single value in a wire message
///
/// Composite values (options, tracks) are serialized to `Text` before they
/// are embedded, so a message never nests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireRepr", into = "WireRepr")]
pub enum WireValue {
    Null,
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

/// JSON shape of a `WireValue`; bytes travel base64-encoded
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireRepr {
    Null,
    Int(i64),
    Text(String),
    Bytes { b64: String },
}

impl From<WireValue> for WireRepr {
    fn from(value: WireValue) -> Self {
        match value {
            WireValue::Null => WireRepr::Null,
            WireValue::Int(v) => WireRepr::Int(v),
            WireValue::Text(v) => WireRepr::Text(v),
            WireValue::Bytes(v) => WireRepr::Bytes {
                b64: base64::engine::general_purpose::STANDARD.encode(v),
            },
        }
    }
}

impl TryFrom<WireRepr> for WireValue {
    type Error = base64::DecodeError;

    fn try_from(repr: WireRepr) -> Result<Self, Self::Error> {
        Ok(match repr {
            WireRepr::Null => WireValue::Null,
            WireRepr::Int(v) => WireValue::Int(v),
            WireRepr::Text(v) => WireValue::Text(v),
            WireRepr::Bytes { b64 } => {
                WireValue::Bytes(base64::engine::general_purpose::STANDARD.decode(b64)?)
            }
        })
    }
}

impl From<&str> for WireValue {
    fn from(value: &str) -> Self {
        WireValue::Text(value.to_string())
    }
}

impl From<String> for WireValue {
    fn from(value: String) -> Self {
        WireValue::Text(value)
    }
}

impl From<i64> for WireValue {
    fn from(value: i64) -> Self {
        WireValue::Int(value)
    }
}

impl From<Vec<u8>> for WireValue {
    fn from(value: Vec<u8>) -> Self {
        WireValue::Bytes(value)
    }
}

impl From<Option<Vec<u8>>> for WireValue {
    fn from(value: Option<Vec<u8>>) -> Self {
        value.map_or(WireValue::Null, WireValue::Bytes)
    }
}

/// Flat string-keyed message exchanged over a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireMessage {
    fields: BTreeMap<String, WireValue>,
}

impl WireMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// New message carrying `command`
    pub fn command(command: Command) -> Self {
        Self::new().with(keys::COMMAND, command.as_str())
    }

    /// Response carrying `commandStatus = ok`
    pub fn ok() -> Self {
        Self::new().with(keys::COMMAND_STATUS, CommandStatus::Ok.as_str())
    }

    /// Response carrying `commandStatus = fail`
    pub fn fail() -> Self {
        Self::new().with(keys::COMMAND_STATUS, CommandStatus::Fail.as_str())
    }

    /// Response produced by a transport that could not deliver the request
    pub fn service_failed() -> Self {
        Self::new().with(keys::SERVICE_FAILED, 1i64)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<WireValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn command_name(&self) -> Option<&str> {
        match self.get(keys::COMMAND) {
            Some(WireValue::Text(name)) => Some(name),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Result<&str, ProtocolError> {
        match self.get(key) {
            Some(WireValue::Text(value)) => Ok(value),
            Some(_) => Err(ProtocolError::WrongType(key.to_string())),
            None => Err(ProtocolError::MissingField(key.to_string())),
        }
    }

    pub fn int(&self, key: &str) -> Result<i64, ProtocolError> {
        match self.get(key) {
            Some(WireValue::Int(value)) => Ok(*value),
            // Some peers send counts as decimal strings
            Some(WireValue::Text(value)) => value
                .parse()
                .map_err(|_| ProtocolError::WrongType(key.to_string())),
            Some(_) => Err(ProtocolError::WrongType(key.to_string())),
            None => Err(ProtocolError::MissingField(key.to_string())),
        }
    }

    /// Nullable byte payload; a missing key reads as `None`
    pub fn bytes(&self, key: &str) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self.get(key) {
            Some(WireValue::Bytes(value)) => Ok(Some(value.clone())),
            Some(WireValue::Null) | None => Ok(None),
            Some(_) => Err(ProtocolError::WrongType(key.to_string())),
        }
    }

    /// Classify a response to a client request.
    ///
    /// A transport failure marker or a missing/unknown `commandStatus` is a
    /// channel failure; `fail` is an ordinary application-level outcome.
    pub fn command_status(&self) -> Result<CommandStatus, ChannelError> {
        if self.contains_key(keys::SERVICE_FAILED) {
            return Err(ChannelError::ServiceFailed);
        }

        match self.get(keys::COMMAND_STATUS) {
            Some(WireValue::Text(value)) => CommandStatus::parse(value)
                .ok_or_else(|| ChannelError::InvalidCommandStatus(value.clone())),
            Some(other) => Err(ChannelError::InvalidCommandStatus(format!("{:?}", other))),
            None => Err(ChannelError::MissingCommandStatus),
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_slice(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
