//! Versioned protocol schema shared by the dispatcher and the session client

use std::fmt;

/// Version carried by `startSession`; the dispatcher rejects other versions
pub const PROTOCOL_VERSION: i64 = 1;

/// Service name used to derive transport addresses (e.g. NATS subjects)
pub const SERVICE_NAME: &str = "audioid.relay";

/// Field names of the flat wire message
pub mod keys {
    pub const COMMAND: &str = "command";
    pub const COMMAND_STATUS: &str = "commandStatus";
    pub const PROTOCOL_VERSION: &str = "protocolVersion";
    pub const OPTIONS: &str = "options";
    pub const SESSION_ID: &str = "sessionId";
    pub const SAMPLE: &str = "sample";
    pub const STATUS: &str = "status";
    pub const TRACK_COUNT: &str = "trackCount";
    /// Transport-level failure marker, never set by the dispatcher
    pub const SERVICE_FAILED: &str = "serviceFailed";
}

/// Key of the `index`th serialized track in a `status` push
pub fn track_key(index: usize) -> String {
    format!("track-{}", index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    StartSession,
    AddSample,
    EndSession,
    /// Server-to-client push
    Status,
}

impl Command {
    pub const fn as_str(self) -> &'static str {
        match self {
            Command::StartSession => "startSession",
            Command::AddSample => "addSample",
            Command::EndSession => "endSession",
            Command::Status => "status",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "startSession" => Some(Command::StartSession),
            "addSample" => Some(Command::AddSample),
            "endSession" => Some(Command::EndSession),
            "status" => Some(Command::Status),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level outcome of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    Fail,
}

impl CommandStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Ok => "ok",
            CommandStatus::Fail => "fail",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ok" => Some(CommandStatus::Ok),
            "fail" => Some(CommandStatus::Fail),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        self == CommandStatus::Ok
    }
}
