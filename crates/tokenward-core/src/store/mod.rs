//! Secure key-value storage for session data.
//!
//! This module provides:
//! - `SecureStore`: the narrow put/get/remove contract the session core uses
//! - `KeyringStore`: OS-level storage via keyring
//! - `FileStore`: a JSON file in the cache directory (not encrypted)
//! - `MemoryStore`: process-local storage for ephemeral sessions
//! - `SessionStorage`: the two persisted session keys on top of any store

pub mod file;
pub mod keyring;
pub mod memory;
pub mod session;

use async_trait::async_trait;
use thiserror::Error;

pub use self::file::FileStore;
pub use self::keyring::KeyringStore;
pub use self::memory::MemoryStore;
pub use self::session::{PersistedSession, SessionStorage};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Secure storage unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed stored data: {0}")]
    Malformed(String),
}

/// Narrow persistence contract. Implementations may be slow or remote;
/// callers never assume read-after-write is instantaneous.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
