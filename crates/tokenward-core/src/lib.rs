//! tokenward-core - authentication session and token refresh coordination.
//!
//! The crate owns the current authentication state, decides when a
//! credential must be renewed, makes sure concurrent callers never trigger
//! more than one renewal at a time, and classifies failures into retryable
//! and terminal outcomes.
//!
//! The network side (login, logout, renewal) is supplied by the application
//! through [`IdentityBackend`]; persistence goes through [`SecureStore`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenward_core::{KeyringStore, RenewalConfig, SessionService};
//! # async fn run(backend: Arc<dyn tokenward_core::IdentityBackend>) -> anyhow::Result<()> {
//! let service = SessionService::new(backend, Arc::new(KeyringStore::default()), RenewalConfig::load()?);
//! if !service.restore_session().await {
//!     // show a login form
//! }
//! let token = service.get_token().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod backend;
pub mod config;
pub mod http;
pub mod store;

#[cfg(test)]
mod testing;

pub use auth::{
    CredentialError, CredentialRecord, CredentialSink, FailureReason, LoginCredentials,
    LoginError, LogoutError, LogoutOutcome, RefreshCoordinator, RefreshResult, SessionService,
    SessionState, SessionStateHandle, TokenProvider, UserProfile,
};
pub use backend::{AuthenticatedSession, BackendError, IdentityBackend};
pub use config::RenewalConfig;
pub use http::{SigningClient, SigningError};
pub use store::{FileStore, KeyringStore, MemoryStore, PersistedSession, SecureStore, SessionStorage, StoreError};
