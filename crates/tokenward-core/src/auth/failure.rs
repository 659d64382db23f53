//! Closed failure and outcome taxonomies.
//!
//! Every remote or local failure is mapped into one of these enums at the
//! component boundary, so callers never reason over raw status codes or
//! error strings.

use thiserror::Error;

use crate::backend::BackendError;

/// Why a credential renewal failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("Credential expired")]
    TokenExpired,

    #[error("Credential revoked")]
    TokenRevoked,

    #[error("No renewal credential available")]
    NoRefreshCredential,

    #[error("Network error: {0}")]
    NetworkError(String),

    /// Retryability is fixed from the status code when the value is built.
    #[error("Server error {code}: {message}")]
    ServerError {
        code: u16,
        message: String,
        retryable: bool,
    },

    #[error("Failed to persist renewed credential: {0}")]
    StorageError(String),

    #[error("Refresh cancelled")]
    Cancelled,
}

impl FailureReason {
    pub fn server(code: u16, message: impl Into<String>) -> Self {
        FailureReason::ServerError {
            code,
            message: message.into(),
            retryable: (500..=599).contains(&code),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            FailureReason::NetworkError(_) => true,
            FailureReason::ServerError { retryable, .. } => *retryable,
            FailureReason::TokenExpired
            | FailureReason::TokenRevoked
            | FailureReason::NoRefreshCredential
            | FailureReason::StorageError(_)
            | FailureReason::Cancelled => false,
        }
    }

    /// Whether this failure ends the session and is reported on the
    /// terminal-failure stream. Cancellation is initiated locally by whoever
    /// is closing the session, so it never counts.
    pub fn ends_session(&self) -> bool {
        match self {
            FailureReason::Cancelled => false,
            FailureReason::TokenExpired
            | FailureReason::TokenRevoked
            | FailureReason::NoRefreshCredential
            | FailureReason::NetworkError(_)
            | FailureReason::ServerError { .. }
            | FailureReason::StorageError(_) => true,
        }
    }
}

impl From<BackendError> for FailureReason {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Timeout => FailureReason::NetworkError(err.to_string()),
            BackendError::Transport(cause) => FailureReason::NetworkError(cause),
            BackendError::Status { status, .. } => {
                match err.payload_code().as_deref() {
                    Some("token_revoked" | "revoked" | "invalid_grant") => {
                        return FailureReason::TokenRevoked
                    }
                    Some("token_expired" | "expired_token") => return FailureReason::TokenExpired,
                    _ => {}
                }
                match status {
                    401 => FailureReason::TokenExpired,
                    403 => FailureReason::TokenRevoked,
                    _ => FailureReason::server(status, err.message()),
                }
            }
        }
    }
}

/// Why a login attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Credentials rejected")]
    CredentialsRejected,

    #[error("Account locked")]
    AccountLocked,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Unrecognized response {status}: {message}")]
    Unrecognized { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to persist session: {0}")]
    Storage(String),
}

impl LoginError {
    /// Message suitable for showing next to a login form.
    pub fn user_message(&self) -> String {
        match self {
            LoginError::InvalidInput(reason) => reason.clone(),
            LoginError::CredentialsRejected => "Invalid username or password".to_string(),
            LoginError::AccountLocked => {
                "Account is locked. Try again later or contact support.".to_string()
            }
            LoginError::AccountDisabled => "Account has been disabled.".to_string(),
            LoginError::Network(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            LoginError::Server { .. } => {
                "The server is having trouble. Please try again.".to_string()
            }
            LoginError::Unrecognized { .. }
            | LoginError::InvalidResponse(_)
            | LoginError::Storage(_) => format!("Login failed: {}", self),
        }
    }
}

impl From<BackendError> for LoginError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Timeout => LoginError::Network(err.to_string()),
            BackendError::Transport(cause) => LoginError::Network(cause),
            BackendError::Status { status, .. } => {
                match err.payload_code().as_deref() {
                    Some("invalid_credentials" | "invalid_grant" | "unauthorized") => {
                        return LoginError::CredentialsRejected
                    }
                    Some("account_locked" | "locked") => return LoginError::AccountLocked,
                    Some("account_disabled" | "disabled") => return LoginError::AccountDisabled,
                    _ => {}
                }
                let message = err.message();
                match status {
                    400 | 401 => LoginError::CredentialsRejected,
                    403 => LoginError::AccountDisabled,
                    423 => LoginError::AccountLocked,
                    500..=599 => LoginError::Server { status, message },
                    _ => LoginError::Unrecognized { status, message },
                }
            }
        }
    }
}

/// Result of a logout request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// Local and remote state both cleared.
    Success,
    /// Local state cleared; the remote invalidation failed.
    PartialSuccess(String),
    /// There was no session to close.
    AlreadyLoggedOut,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogoutError {
    /// Remote invalidation failed and local clearing was not forced; the
    /// session is still active.
    #[error("Remote logout failed: {0}")]
    Remote(BackendError),

    /// Session closed in memory, but persisted data could not be removed.
    #[error("Failed to clear persisted session: {0}")]
    Storage(String),
}
