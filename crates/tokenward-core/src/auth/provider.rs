use async_trait::async_trait;

use super::SessionService;

/// What request-signing code needs from the session, and nothing more.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Access value to attach to a request, renewed transparently if needed.
    async fn get_token(&self) -> Option<String>;

    fn is_expired(&self) -> bool;
}

#[async_trait]
impl TokenProvider for SessionService {
    async fn get_token(&self) -> Option<String> {
        SessionService::get_token(self).await
    }

    fn is_expired(&self) -> bool {
        SessionService::is_expired(self)
    }
}
