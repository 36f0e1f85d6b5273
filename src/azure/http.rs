//! HTTP utilities for Azure REST API calls

use crate::error::HttpError;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and drops non-printable characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Point in time by which every outbound call of a cycle must complete
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    /// Time left before the deadline, used as the per-request timeout
    pub fn remaining(&self) -> Result<Duration, HttpError> {
        self.0
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
            .ok_or(HttpError::DeadlineExceeded)
    }
}

/// HTTP client wrapper for Azure API calls
#[derive(Clone)]
pub struct AzureHttpClient {
    client: Client,
}

impl AzureHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(concat!("azure-metrics-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// Make an authenticated GET request
    pub async fn get(&self, url: &str, token: &str, deadline: &Deadline) -> Result<Value, HttpError> {
        tracing::debug!("GET {}", url);
        let request = self.client.get(url).bearer_auth(token);
        self.send(request, deadline).await
    }

    /// Make an authenticated POST request with a JSON body
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        token: &str,
        body: &B,
        deadline: &Deadline,
    ) -> Result<Value, HttpError> {
        tracing::debug!("POST {}", url);
        let request = self.client.post(url).bearer_auth(token).json(body);
        self.send(request, deadline).await
    }

    /// Make an unauthenticated form POST (token endpoint)
    pub async fn post_form<F: Serialize + ?Sized>(
        &self,
        url: &str,
        form: &F,
        deadline: &Deadline,
    ) -> Result<Value, HttpError> {
        tracing::debug!("POST {}", url);
        let request = self.client.post(url).form(form);
        self.send(request, deadline).await
    }

    /// Make an unauthenticated GET with an extra header (instance metadata)
    pub async fn get_with_header(
        &self,
        url: &str,
        header: (&str, &str),
        deadline: &Deadline,
    ) -> Result<Value, HttpError> {
        tracing::debug!("GET {}", url);
        let request = self.client.get(url).header(header.0, header.1);
        self.send(request, deadline).await
    }

    async fn send(&self, request: RequestBuilder, deadline: &Deadline) -> Result<Value, HttpError> {
        let response = request.timeout(deadline.remaining()?).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if status != reqwest::StatusCode::OK {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(HttpError::Status {
                status: status.as_u16(),
                body: sanitize_for_log(&body),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&body)?)
    }
}
