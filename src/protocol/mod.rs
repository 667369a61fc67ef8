//! Wire protocol between session proxies and the dispatcher
//!
//! - `schema` - command names, field keys, protocol version
//! - `message` - the flat `WireMessage` and its JSON encoding
//! - `command` - typed requests and the `status` push

mod command;
mod message;
pub mod schema;

pub use command::{Request, StatusPush};
pub use message::{WireMessage, WireValue};
pub use schema::{keys, track_key, Command, CommandStatus, PROTOCOL_VERSION, SERVICE_NAME};
