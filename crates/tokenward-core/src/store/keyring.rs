use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use super::{SecureStore, StoreError};
use crate::config::APP_NAME;

/// Stores each key as a separate entry in the OS keychain.
///
/// Keychain calls block, so they run on the blocking pool.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(APP_NAME)
    }
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &key).map_err(unavailable)?;
            op(entry).map_err(unavailable)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("Keychain task failed: {}", e)))?
    }
}

fn unavailable(err: keyring::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl SecureStore for KeyringStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        debug!(key, "Storing value in keychain");
        let value = value.to_string();
        self.with_entry(key, move |entry| entry.set_password(&value))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        debug!(key, "Removing value from keychain");
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        assert_eq!(KeyringStore::default().service(), "tokenward");
        assert_eq!(KeyringStore::new("other").service(), "other");
    }

    #[test]
    fn test_keyring_errors_map_to_unavailable() {
        let err = unavailable(keyring::Error::NoEntry);
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
