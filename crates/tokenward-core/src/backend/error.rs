use serde::Deserialize;
use thiserror::Error;

/// Failure reported by an [`IdentityBackend`](super::IdentityBackend) call.
///
/// Timeouts are the backend's responsibility; they surface here as
/// [`BackendError::Timeout`] and are treated as network failures upstream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// JSON error body returned by most identity providers.
///
/// Only the machine-readable code is used for classification; the message
/// is carried along for logs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, alias = "error_description")]
    pub message: Option<String>,
}

impl ErrorPayload {
    /// Parse a response body, returning `None` for non-JSON bodies.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    /// Lowercased error code, preferring `error` over `code`.
    pub fn error_code(&self) -> Option<String> {
        self.error
            .as_deref()
            .or(self.code.as_deref())
            .map(|code| code.trim().to_ascii_lowercase())
    }
}

impl BackendError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        BackendError::Status {
            status: status.as_u16(),
            body: Self::truncate_body(body),
        }
    }

    /// Error code from a JSON body, if this is a status error carrying one.
    pub fn payload_code(&self) -> Option<String> {
        match self {
            BackendError::Status { body, .. } => {
                ErrorPayload::parse(body).and_then(|p| p.error_code())
            }
            BackendError::Timeout | BackendError::Transport(_) => None,
        }
    }

    /// Human readable message: the payload message when present, else the raw body.
    pub fn message(&self) -> String {
        match self {
            BackendError::Status { body, .. } => ErrorPayload::parse(body)
                .and_then(|p| p.message)
                .unwrap_or_else(|| body.clone()),
            BackendError::Timeout | BackendError::Transport(_) => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if let Some(status) = err.status() {
            BackendError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}
