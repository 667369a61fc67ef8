use std::sync::Arc;

use async_trait::async_trait;

use super::options::SessionOptions;
use super::session::IdentifySession;
use crate::error::FactoryError;

/// Creates identification sessions for one backend
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<dyn IdentifySession>, FactoryError>;
}
