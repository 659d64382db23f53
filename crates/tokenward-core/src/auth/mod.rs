//! Authentication session management.
//!
//! This module provides:
//! - `CredentialRecord`: immutable access/renewal credential with expiry
//! - `SessionStateHandle`: the observable "who is logged in" cell
//! - `RefreshCoordinator`: single-flight renewal with retry and backoff
//! - `SessionService`: login, logout, restore and lazy token renewal
//! - `TokenProvider`: the narrow contract used by request signing
//!
//! Failures are reported through the closed enums in `failure`.

pub mod credential;
pub mod failure;
pub mod provider;
pub mod refresh;
pub mod service;
pub mod state;

pub use credential::{CredentialError, CredentialRecord, LoginCredentials, UserProfile};
pub use failure::{FailureReason, LoginError, LogoutError, LogoutOutcome};
pub use provider::TokenProvider;
pub use refresh::{CredentialSink, RefreshCoordinator, RefreshResult};
pub use service::SessionService;
pub use state::{SessionState, SessionStateHandle};
