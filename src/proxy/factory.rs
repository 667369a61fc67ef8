use std::sync::Arc;

use async_trait::async_trait;

use super::client::SessionClient;
use super::session::ProxySession;
use crate::error::FactoryError;
use crate::identify::{IdentifySession, SessionFactory, SessionOptions};

/// Creates proxy sessions that share one session client
pub struct ProxySessionFactory {
    client: Arc<SessionClient>,
}

impl ProxySessionFactory {
    pub fn new(client: Arc<SessionClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<SessionClient> {
        &self.client
    }

    /// Like `create_session`, but keeps the concrete proxy type
    pub fn create_proxy(&self, options: SessionOptions) -> Arc<ProxySession> {
        Arc::new(ProxySession::new(Arc::clone(&self.client), options))
    }
}

#[async_trait]
impl SessionFactory for ProxySessionFactory {
    async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<dyn IdentifySession>, FactoryError> {
        let session: Arc<dyn IdentifySession> = self.create_proxy(options);
        Ok(session)
    }
}
