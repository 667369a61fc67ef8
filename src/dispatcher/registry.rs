use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::identify::IdentifySession;

/// A live backend session owned by the dispatcher
struct RegistryEntry {
    session: Arc<dyn IdentifySession>,
    /// Serializes commands for this session in arrival order
    gate: Arc<Mutex<()>>,
    /// Task forwarding status events as push messages
    subscription: Option<JoinHandle<()>>,
    created_at: DateTime<Utc>,
}

impl RegistryEntry {
    fn unsubscribe(&mut self) {
        if let Some(task) = self.subscription.take() {
            task.abort();
        }
    }
}

/// Snapshot of one registered session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// Remote session id -> backend session
///
/// Every entry's subscription is cancelled before the entry is removed.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: String, session: Arc<dyn IdentifySession>) {
        let entry = RegistryEntry {
            session,
            gate: Arc::new(Mutex::new(())),
            subscription: None,
            created_at: Utc::now(),
        };

        // A factory may hand back a session it already produced
        if let Some(mut previous) = self.entries.insert(session_id, entry) {
            previous.unsubscribe();
        }
    }

    /// Attach the forwarding task to a registered session.
    ///
    /// Aborts the task and returns false if the session is already gone.
    pub fn attach_subscription(&self, session_id: &str, task: JoinHandle<()>) -> bool {
        match self.entries.get_mut(session_id) {
            Some(mut entry) => {
                entry.unsubscribe();
                entry.subscription = Some(task);
                true
            }
            None => {
                task.abort();
                false
            }
        }
    }

    pub fn lookup(&self, session_id: &str) -> Option<(Arc<dyn IdentifySession>, Arc<Mutex<()>>)> {
        self.entries
            .get(session_id)
            .map(|entry| (Arc::clone(&entry.session), Arc::clone(&entry.gate)))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.entries.contains_key(session_id)
    }

    /// Unsubscribe from and forget a session
    pub fn remove(
        &self,
        session_id: &str,
    ) -> Option<(Arc<dyn IdentifySession>, Arc<Mutex<()>>)> {
        {
            let mut entry = self.entries.get_mut(session_id)?;
            entry.unsubscribe();
        }

        self.entries
            .remove(session_id)
            .map(|(_, entry)| (entry.session, entry.gate))
    }

    /// Unsubscribe from and forget every session, returning how many there were
    pub fn clear(&self) -> usize {
        for mut entry in self.entries.iter_mut() {
            entry.unsubscribe();
        }

        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.entries
            .iter()
            .map(|entry| SessionSummary {
                session_id: entry.key().clone(),
                created_at: entry.created_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedSessionFactory;
    use crate::identify::{SessionFactory, SessionOptions};

    async fn session() -> Arc<dyn IdentifySession> {
        ScriptedSessionFactory::new(1)
            .create_session(SessionOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_remove_cancels_subscription() {
        let registry = SessionRegistry::new();
        registry.insert("a".to_string(), session().await);

        let task = tokio::spawn(std::future::pending::<()>());
        assert!(registry.attach_subscription("a", task));

        assert!(registry.remove("a").is_some());
        assert!(!registry.contains("a"));
        assert!(registry.remove("a").is_none());
    }

    #[tokio::test]
    async fn test_late_subscription_is_aborted() {
        let registry = SessionRegistry::new();

        let (alive, dropped) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await
        });

        assert!(!registry.attach_subscription("gone", task));
        assert!(dropped.await.is_err());
    }

    #[tokio::test]
    async fn test_clear_reports_count() {
        let registry = SessionRegistry::new();
        registry.insert("a".to_string(), session().await);
        registry.insert("b".to_string(), session().await);

        assert_eq!(registry.summaries().len(), 2);
        assert_eq!(registry.clear(), 2);
        assert_eq!(registry.len(), 0);
    }
}
