//! Identification domain types
//!
//! Plain data (`Track`, `IdentifyStatus`, `SessionOptions`) and the session
//! capability shared by every backend and by the client-side proxy.

mod factory;
mod options;
mod session;
mod status;
mod track;

pub use factory::SessionFactory;
pub use options::SessionOptions;
pub use session::{new_session_id, IdentifySession};
pub use status::{IdentifyStatus, StatusChanged, StatusNotifier};
pub use track::Track;
