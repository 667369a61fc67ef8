use tokio::sync::{broadcast, watch};

/// Capacity of the per-session status event channel.
///
/// A session changes status at most three times, so a subscriber only lags
/// if it never polls.
const STATUS_EVENT_CAPACITY: usize = 16;

/// Progress of one identification attempt.
///
/// `Invalid` is the only initial state; `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdentifyStatus {
    #[default]
    Invalid,
    Incomplete,
    Complete,
    Error,
}

impl IdentifyStatus {
    /// Integer code used on the wire
    pub fn code(self) -> i64 {
        match self {
            IdentifyStatus::Invalid => 0,
            IdentifyStatus::Incomplete => 1,
            IdentifyStatus::Complete => 2,
            IdentifyStatus::Error => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(IdentifyStatus::Invalid),
            1 => Some(IdentifyStatus::Incomplete),
            2 => Some(IdentifyStatus::Complete),
            3 => Some(IdentifyStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IdentifyStatus::Complete | IdentifyStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IdentifyStatus::Invalid => "invalid",
            IdentifyStatus::Incomplete => "incomplete",
            IdentifyStatus::Complete => "complete",
            IdentifyStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for IdentifyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification emitted when a session's status changes value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChanged {
    pub session_id: String,
    pub status: IdentifyStatus,
}

/// Current status of a session plus its change-notification stream.
///
/// Every session implementation (backend or proxy) owns one of these. An
/// update only notifies subscribers when the value actually changes, and
/// events are sent while the new value is being stored, so subscribers see
/// changes in the order they were made.
#[derive(Debug)]
pub struct StatusNotifier {
    session_id: String,
    current: watch::Sender<IdentifyStatus>,
    events: broadcast::Sender<StatusChanged>,
}

impl StatusNotifier {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (current, _) = watch::channel(IdentifyStatus::Invalid);
        let (events, _) = broadcast::channel(STATUS_EVENT_CAPACITY);

        Self {
            session_id: session_id.into(),
            current,
            events,
        }
    }

    pub fn status(&self) -> IdentifyStatus {
        *self.current.borrow()
    }

    /// Store `status`, notifying subscribers if it differs from the current value.
    ///
    /// Returns whether a notification was sent.
    pub fn update(&self, status: IdentifyStatus) -> bool {
        let events = &self.events;
        let session_id = &self.session_id;

        self.current.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;

            // No subscribers is not an error
            let _ = events.send(StatusChanged {
                session_id: session_id.clone(),
                status,
            });
            true
        })
    }

    /// Subscribe to every future status change
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.events.subscribe()
    }

    /// Watch the latest status value (intermediate values may be skipped)
    pub fn watch(&self) -> watch::Receiver<IdentifyStatus> {
        self.current.subscribe()
    }
}
