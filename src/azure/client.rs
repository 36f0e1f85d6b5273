//! Azure Client
//!
//! Main client for interacting with Azure Resource Manager, combining the
//! shared token and the HTTP transport.

use super::auth::{AuthSettings, TokenManager};
use super::http::{AzureHttpClient, Deadline};
use crate::error::{CollectError, HttpError, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Main Azure client. Cheap to clone; clones share the token.
#[derive(Clone)]
pub struct AzureClient {
    pub http: AzureHttpClient,
    pub tokens: Arc<TokenManager>,
}

impl AzureClient {
    pub fn new(settings: AuthSettings) -> Result<Self> {
        let http = AzureHttpClient::new()
            .map_err(|e| CollectError::Config(format!("failed to create HTTP client: {}", e)))?;
        let tokens = Arc::new(TokenManager::new(http.clone(), settings));
        Ok(Self { http, tokens })
    }

    /// Get a valid access token, refreshing it if it is close to expiry
    pub async fn ensure_token(&self, deadline: &Deadline) -> Result<String> {
        self.tokens.ensure_valid(deadline).await
    }

    /// Make an authenticated GET request. Transport failures are turned into
    /// the caller's error kind by `on_error`.
    pub async fn get<E>(&self, url: &str, deadline: &Deadline, on_error: E) -> Result<Value>
    where
        E: FnOnce(HttpError) -> CollectError,
    {
        let token = self.ensure_token(deadline).await?;
        self.http.get(url, &token, deadline).await.map_err(on_error)
    }

    /// Make an authenticated POST request with a JSON body
    pub async fn post<B, E>(&self, url: &str, body: &B, deadline: &Deadline, on_error: E) -> Result<Value>
    where
        B: Serialize + ?Sized,
        E: FnOnce(HttpError) -> CollectError,
    {
        let token = self.ensure_token(deadline).await?;
        self.http
            .post_json(url, &token, body, deadline)
            .await
            .map_err(on_error)
    }
}
