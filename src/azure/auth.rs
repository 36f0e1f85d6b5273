//! Azure Authentication
//!
//! Acquires bearer tokens with either the client-credential grant or the
//! platform managed identity, and keeps the single token shared by every
//! collection cycle.

use super::http::{AzureHttpClient, Deadline};
use crate::config::{Config, Credentials};
use crate::error::{CollectError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

/// Refresh tokens this many minutes before they actually expire
const REFRESH_MARGIN_MINUTES: i64 = 10;

/// API version of the instance metadata token endpoint
const MANAGED_IDENTITY_API_VERSION: &str = "2018-02-01";

/// Everything needed to talk to the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub authority_url: String,
    pub resource_manager_url: String,
    pub managed_identity_url: String,
    pub credentials: Credentials,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            authority_url: config.active_directory_authority_url.clone(),
            resource_manager_url: config.resource_manager_url.clone(),
            managed_identity_url: config.managed_identity_url.clone(),
            credentials: config.credentials.clone(),
        }
    }
}

/// A bearer token and the instant it stops being valid
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: String,
    expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_on,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    /// True once `now` has reached `expiry - 10 minutes`
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_on - TimeDelta::minutes(REFRESH_MARGIN_MINUTES)
    }
}

/// Shared token holder, bound to one set of auth settings.
///
/// The whole check-then-refresh sequence runs under one async mutex: when
/// several cycles find the token stale at once, the first one refreshes and
/// the others wait and reuse its result.
pub struct TokenManager {
    http: AzureHttpClient,
    settings: AuthSettings,
    token: Mutex<Option<AccessToken>>,
}

impl TokenManager {
    pub fn new(http: AzureHttpClient, settings: AuthSettings) -> Self {
        Self {
            http,
            settings,
            token: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Return a token with at least ten minutes of validity left,
    /// refreshing it first if needed.
    pub async fn ensure_valid(&self, deadline: &Deadline) -> Result<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh(Utc::now()) {
                return Ok(token.value.clone());
            }
            tracing::debug!("Access token expires at {}, refreshing", token.expires_on);
        }

        let token = acquire(&self.http, &self.settings, deadline).await?;
        tracing::debug!("New access token acquired, expires at {}", token.expires_on);

        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}

/// Request a fresh token from the configured endpoint
pub async fn acquire(
    http: &AzureHttpClient,
    settings: &AuthSettings,
    deadline: &Deadline,
) -> Result<AccessToken> {
    let response = if settings.credentials.uses_managed_identity() {
        tracing::info!("Using managed identity");
        let url = format!(
            "{}?resource={}&api-version={}",
            settings.managed_identity_url,
            urlencoding::encode(&settings.resource_manager_url),
            MANAGED_IDENTITY_API_VERSION
        );
        http.get_with_header(&url, ("Metadata", "true"), deadline).await
    } else {
        let url = format!(
            "{}/{}/oauth2/token",
            settings.authority_url.trim_end_matches('/'),
            settings.credentials.tenant_id
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("resource", settings.resource_manager_url.as_str()),
            ("client_id", settings.credentials.client_id.as_str()),
            ("client_secret", settings.credentials.client_secret.as_str()),
        ];
        http.post_form(&url, &form, deadline).await
    };

    let body = response
        .map_err(|e| CollectError::Auth(format!("error authenticating against Azure API: {}", e)))?;
    parse_token(body)
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_on: EpochSeconds,
}

/// `expires_on` is a string on the AAD endpoint and may be a number elsewhere
#[derive(Deserialize)]
#[serde(untagged)]
enum EpochSeconds {
    Text(String),
    Number(i64),
}

fn parse_token(body: Value) -> Result<AccessToken> {
    let response: TokenResponse = serde_json::from_value(body)
        .map_err(|e| CollectError::Auth(format!("malformed token response: {}", e)))?;

    let seconds = match response.expires_on {
        EpochSeconds::Number(n) => n,
        EpochSeconds::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| CollectError::Auth(format!("invalid expires_on {:?}: {}", s, e)))?,
    };

    let expires_on = DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| CollectError::Auth(format!("expires_on {} out of range", seconds)))?;

    Ok(AccessToken::new(response.access_token, expires_on))
}
