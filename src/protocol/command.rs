use super::message::WireMessage;
use super::schema::{keys, track_key, Command, PROTOCOL_VERSION};
use crate::error::ProtocolError;
use crate::identify::{IdentifyStatus, SessionOptions, Track};

/// A client-to-server command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    StartSession {
        options: SessionOptions,
    },
    AddSample {
        session_id: String,
        /// `None` is the finalize signal and is passed through verbatim
        sample: Option<Vec<u8>>,
    },
    EndSession {
        session_id: String,
    },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::StartSession { .. } => Command::StartSession,
            Request::AddSample { .. } => Command::AddSample,
            Request::EndSession { .. } => Command::EndSession,
        }
    }

    pub fn into_message(self) -> Result<WireMessage, ProtocolError> {
        let message = WireMessage::command(self.command());

        Ok(match self {
            Request::StartSession { options } => message
                .with(keys::PROTOCOL_VERSION, PROTOCOL_VERSION)
                .with(keys::OPTIONS, options.to_json()?),
            Request::AddSample { session_id, sample } => message
                .with(keys::SESSION_ID, session_id)
                .with(keys::SAMPLE, sample),
            Request::EndSession { session_id } => message.with(keys::SESSION_ID, session_id),
        })
    }

    pub fn from_message(message: &WireMessage) -> Result<Self, ProtocolError> {
        let name = message.command_name().ok_or(ProtocolError::MissingCommand)?;
        let command =
            Command::parse(name).ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))?;

        match command {
            Command::StartSession => {
                // Peers that predate versioning omit the field
                if message.contains_key(keys::PROTOCOL_VERSION) {
                    let version = message.int(keys::PROTOCOL_VERSION)?;
                    if version != PROTOCOL_VERSION {
                        return Err(ProtocolError::UnsupportedVersion(version));
                    }
                }
                let options = SessionOptions::from_json(message.text(keys::OPTIONS)?)?;
                Ok(Request::StartSession { options })
            }
            Command::AddSample => Ok(Request::AddSample {
                session_id: session_id(message)?,
                sample: message.bytes(keys::SAMPLE)?,
            }),
            Command::EndSession => Ok(Request::EndSession {
                session_id: session_id(message)?,
            }),
            Command::Status => Err(ProtocolError::UnexpectedCommand(command)),
        }
    }
}

fn session_id(message: &WireMessage) -> Result<String, ProtocolError> {
    let id = message.text(keys::SESSION_ID)?;
    if id.is_empty() {
        return Err(ProtocolError::MissingField(keys::SESSION_ID.to_string()));
    }
    Ok(id.to_string())
}

/// Server-to-client `status` notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPush {
    pub session_id: String,
    pub status: IdentifyStatus,
    /// Only carried when `status` is `Complete`
    pub tracks: Vec<Track>,
}

impl StatusPush {
    pub fn into_message(self) -> Result<WireMessage, ProtocolError> {
        let mut message = WireMessage::command(Command::Status)
            .with(keys::SESSION_ID, self.session_id)
            .with(keys::STATUS, self.status.code());

        if self.status == IdentifyStatus::Complete {
            message.insert(keys::TRACK_COUNT, self.tracks.len() as i64);
            for (index, track) in self.tracks.iter().enumerate() {
                message.insert(track_key(index), track.to_json()?);
            }
        }

        Ok(message)
    }

    pub fn from_message(message: &WireMessage) -> Result<Self, ProtocolError> {
        match message.command_name() {
            Some(name) if name == Command::Status.as_str() => {}
            Some(name) => return Err(ProtocolError::UnknownCommand(name.to_string())),
            None => return Err(ProtocolError::MissingCommand),
        }

        let session_id = message.text(keys::SESSION_ID)?.to_string();
        let code = message.int(keys::STATUS)?;
        let status = IdentifyStatus::from_code(code).ok_or(ProtocolError::InvalidStatus(code))?;

        let mut tracks = Vec::new();
        if status == IdentifyStatus::Complete && message.contains_key(keys::TRACK_COUNT) {
            let count = message.int(keys::TRACK_COUNT)?.max(0) as usize;
            for index in 0..count {
                tracks.push(Track::from_json(message.text(&track_key(index))?)?);
            }
        }

        Ok(Self {
            session_id,
            status,
            tracks,
        })
    }
}
