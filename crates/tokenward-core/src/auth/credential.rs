use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum username length accepted before contacting the backend.
const MAX_USERNAME_LENGTH: usize = 50;

/// Maximum password length accepted before contacting the backend.
const MAX_PASSWORD_LENGTH: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Access value must not be empty")]
    EmptyAccessValue,
}

/// An access credential, its optional renewal credential and absolute expiry.
///
/// Records are immutable: renewal always produces a new record. The access
/// value is guaranteed non-empty, including for records read back from storage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCredentialRecord")]
pub struct CredentialRecord {
    access_value: String,
    renewal_value: Option<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawCredentialRecord {
    access_value: String,
    #[serde(default)]
    renewal_value: Option<String>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<RawCredentialRecord> for CredentialRecord {
    type Error = CredentialError;

    fn try_from(raw: RawCredentialRecord) -> Result<Self, Self::Error> {
        CredentialRecord::new(raw.access_value, raw.renewal_value, raw.expires_at)
    }
}

impl CredentialRecord {
    pub fn new(
        access_value: impl Into<String>,
        renewal_value: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, CredentialError> {
        let access_value = access_value.into();
        if access_value.is_empty() {
            return Err(CredentialError::EmptyAccessValue);
        }
        Ok(Self {
            access_value,
            // An empty renewal value is as good as none
            renewal_value: renewal_value.filter(|v| !v.is_empty()),
            expires_at,
        })
    }

    /// Build a record that expires `lifetime` from now.
    pub fn expiring_in(
        access_value: impl Into<String>,
        renewal_value: Option<String>,
        lifetime: Duration,
    ) -> Result<Self, CredentialError> {
        Self::new(access_value, renewal_value, Utc::now() + lifetime)
    }

    pub fn access_value(&self) -> &str {
        &self.access_value
    }

    pub fn renewal_value(&self) -> Option<&str> {
        self.renewal_value.as_deref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime; negative once expired.
    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_value", &"<redacted>")
            .field(
                "renewal_value",
                &self.renewal_value.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            display_name: None,
        }
    }
}

/// Username and password supplied to [`SessionService::login`](super::SessionService::login).
#[derive(Clone)]
pub struct LoginCredentials {
    username: String,
    password: String,
}

impl LoginCredentials {
    /// Surrounding whitespace is stripped from the username.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            username: username.trim().to_string(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Local format check, so malformed input never reaches the network.
    pub fn validate(&self) -> Result<(), String> {
        let username = self.username.as_str();
        if username.is_empty() || self.password.is_empty() {
            return Err("Username and password required".to_string());
        }
        if username.chars().count() > MAX_USERNAME_LENGTH {
            return Err(format!(
                "Username must be at most {} characters",
                MAX_USERNAME_LENGTH
            ));
        }
        if self.password.chars().count() > MAX_PASSWORD_LENGTH {
            return Err(format!(
                "Password must be at most {} characters",
                MAX_PASSWORD_LENGTH
            ));
        }
        if username.chars().any(char::is_control) || self.password.chars().any(char::is_control) {
            return Err("Credentials must not contain control characters".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
