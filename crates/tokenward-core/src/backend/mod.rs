//! Identity backend contract.
//!
//! The backend performs the network side of login, logout and credential
//! renewal. This crate never speaks a wire protocol itself; applications
//! implement [`IdentityBackend`] on top of their HTTP client and map
//! transport failures into [`BackendError`].

pub mod error;

use async_trait::async_trait;

use crate::auth::{CredentialRecord, LoginCredentials, UserProfile};

pub use error::{BackendError, ErrorPayload};

/// A successful login: the authenticated user and their first credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub user: UserProfile,
    pub credential: CredentialRecord,
}

#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Exchange user credentials for a session.
    async fn login(&self, credentials: &LoginCredentials)
        -> Result<AuthenticatedSession, BackendError>;

    /// Invalidate an access value on the server. Failures are tolerated by callers.
    async fn logout(&self, access_value: &str) -> Result<(), BackendError>;

    /// Exchange a renewal value for a brand-new credential record.
    async fn renew(&self, renewal_value: &str) -> Result<CredentialRecord, BackendError>;
}
