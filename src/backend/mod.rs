//! Identification backends served by the dispatcher
//!
//! Backends:
//! - `scripted` - deterministic backend for tests and the smoke host

mod scripted;

pub use scripted::{ScriptedSession, ScriptedSessionFactory};
