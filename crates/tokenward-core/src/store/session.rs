use std::sync::Arc;

use tracing::debug;

use super::{SecureStore, StoreError};
use crate::auth::{CredentialRecord, UserProfile};

/// Key holding the serialized credential record
pub const CREDENTIAL_KEY: &str = "session.credential";

/// Key holding the serialized user profile
pub const USER_KEY: &str = "session.user";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
    pub user: UserProfile,
    pub credential: CredentialRecord,
}

/// The two persisted session keys on top of a [`SecureStore`].
///
/// Writes put the user first and the credential last; clears remove the
/// credential first. The credential therefore acts as the commit marker: the
/// only partial state a crash or failed clear can leave is a user without a
/// credential, which [`load`](Self::load) reports as malformed so it gets
/// discarded.
#[derive(Clone)]
pub struct SessionStorage {
    store: Arc<dyn SecureStore>,
}

impl SessionStorage {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store }
    }

    pub async fn save(
        &self,
        user: &UserProfile,
        credential: &CredentialRecord,
    ) -> Result<(), StoreError> {
        let user_json =
            serde_json::to_string(user).map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.store.put(USER_KEY, &user_json).await?;
        self.save_credential(credential).await
    }

    pub async fn save_credential(&self, credential: &CredentialRecord) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(credential).map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.store.put(CREDENTIAL_KEY, &json).await?;
        debug!(expires_at = %credential.expires_at(), "Persisted credential");
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        let credential = self.store.get(CREDENTIAL_KEY).await?;
        let user = self.store.get(USER_KEY).await?;

        match (credential, user) {
            (None, None) => Ok(None),
            (Some(credential), Some(user)) => {
                let credential: CredentialRecord = serde_json::from_str(&credential)
                    .map_err(|e| StoreError::Malformed(format!("credential: {}", e)))?;
                let user: UserProfile = serde_json::from_str(&user)
                    .map_err(|e| StoreError::Malformed(format!("user profile: {}", e)))?;
                Ok(Some(PersistedSession { user, credential }))
            }
            (None, Some(_)) => Err(StoreError::Malformed(
                "user profile without credential".into(),
            )),
            (Some(_), None) => Err(StoreError::Malformed(
                "credential without user profile".into(),
            )),
        }
    }

    /// Remove both keys, credential first.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(CREDENTIAL_KEY).await?;
        self.store.remove(USER_KEY).await?;
        debug!("Cleared persisted session");
        Ok(())
    }
}
