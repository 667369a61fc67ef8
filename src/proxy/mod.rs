//! Client-side proxy sessions
//!
//! A `ProxySession` looks like any other `IdentifySession` but forwards its
//! audio to a session hosted behind a `Channel`, through a shared
//! `SessionClient`.

mod client;
mod factory;
mod session;

pub use client::SessionClient;
pub use factory::ProxySessionFactory;
pub use session::ProxySession;
