//! Bearer-token request signing.
//!
//! `SigningClient` asks a [`TokenProvider`] for the access value on every
//! request and attaches it as an `Authorization: Bearer` header. It knows
//! nothing about renewal; that stays behind the provider.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use thiserror::Error;
use tracing::debug;

use crate::auth::TokenProvider;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("No active session")]
    NoSession,

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct SigningClient {
    client: Client,
    provider: Arc<dyn TokenProvider>,
}

impl SigningClient {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Result<Self, SigningError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, provider))
    }

    /// Share an existing connection pool.
    pub fn with_client(client: Client, provider: Arc<dyn TokenProvider>) -> Self {
        Self { client, provider }
    }

    pub async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, SigningError> {
        let token = self.provider.get_token().await.ok_or_else(|| {
            debug!(url, "Refusing to sign request without a session");
            SigningError::NoSession
        })?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    pub async fn get(&self, url: &str) -> Result<RequestBuilder, SigningError> {
        self.request(Method::GET, url).await
    }

    pub async fn post(&self, url: &str) -> Result<RequestBuilder, SigningError> {
        self.request(Method::POST, url).await
    }

    pub fn is_expired(&self) -> bool {
        self.provider.is_expired()
    }
}
