//! Batch request engine
//!
//! Folds independent GET sub-requests into POSTs against the Resource Manager
//! batch endpoint, at most [`BATCH_SIZE`] per call.

use super::client::AzureClient;
use super::endpoints::Endpoints;
use super::http::Deadline;
use crate::error::{CollectError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of sub-requests accepted by the batch endpoint
pub const BATCH_SIZE: usize = 20;

#[derive(Serialize)]
struct BatchBody<'a> {
    requests: Vec<BatchRequest<'a>>,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    #[serde(rename = "relativeUrl")]
    relative_url: &'a str,
    #[serde(rename = "httpMethod")]
    method: &'static str,
}

#[derive(Deserialize)]
struct BatchResponse {
    responses: Vec<BatchItem>,
}

/// Outcome of one sub-request
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    #[serde(rename = "httpStatusCode")]
    pub status: u16,
    #[serde(default)]
    pub content: Value,
}

impl BatchItem {
    /// The content of a 200 response, or a per-item error carrying the
    /// provider's message
    pub fn into_content(self, url: &str) -> Result<Value> {
        if self.status == 200 {
            return Ok(self.content);
        }

        let message = self
            .content
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("no error message")
            .to_string();

        Err(CollectError::PerItem {
            url: url.to_string(),
            status: self.status,
            message,
        })
    }
}

/// Items of every chunk that completed, in request order. When a chunk
/// fails, `failure` is set and neither it nor any later chunk contributes
/// items.
#[derive(Debug)]
pub struct BatchResults {
    pub items: Vec<BatchItem>,
    pub failure: Option<CollectError>,
}

pub struct BatchRequestEngine<'a> {
    client: &'a AzureClient,
    endpoints: &'a Endpoints,
}

impl<'a> BatchRequestEngine<'a> {
    pub fn new(client: &'a AzureClient, endpoints: &'a Endpoints) -> Self {
        Self { client, endpoints }
    }

    pub async fn execute(&self, relative_urls: &[String], deadline: &Deadline) -> BatchResults {
        let mut items = Vec::with_capacity(relative_urls.len());

        for (index, chunk) in relative_urls.chunks(BATCH_SIZE).enumerate() {
            match self.execute_chunk(chunk, deadline).await {
                Ok(chunk_items) => items.extend(chunk_items),
                Err(e) => {
                    tracing::error!(
                        "Batch chunk {} failed, {} of {} sub-requests dropped: {}",
                        index,
                        relative_urls.len() - items.len(),
                        relative_urls.len(),
                        e
                    );
                    return BatchResults {
                        items,
                        failure: Some(e),
                    };
                }
            }
        }

        BatchResults {
            items,
            failure: None,
        }
    }

    async fn execute_chunk(&self, chunk: &[String], deadline: &Deadline) -> Result<Vec<BatchItem>> {
        let body = BatchBody {
            requests: chunk
                .iter()
                .map(|url| BatchRequest {
                    relative_url: url,
                    method: "GET",
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.endpoints.batch_url(), &body, deadline, |e| {
                CollectError::BatchTransport(e.to_string())
            })
            .await?;

        let parsed: BatchResponse = serde_json::from_value(response)
            .map_err(|e| CollectError::BatchTransport(format!("malformed batch envelope: {}", e)))?;

        if parsed.responses.len() != chunk.len() {
            return Err(CollectError::BatchTransport(format!(
                "expected {} responses, got {}",
                chunk.len(),
                parsed.responses.len()
            )));
        }

        Ok(parsed.responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let urls = vec!["/a".to_string(), "/b".to_string()];
        let body = BatchBody {
            requests: urls
                .iter()
                .map(|url| BatchRequest {
                    relative_url: url,
                    method: "GET",
                })
                .collect(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"requests": [
                {"relativeUrl": "/a", "httpMethod": "GET"},
                {"relativeUrl": "/b", "httpMethod": "GET"}
            ]})
        );
    }

    #[test]
    fn test_item_error_carries_provider_message() {
        let item: BatchItem = serde_json::from_value(json!({
            "httpStatusCode": 404,
            "content": {"error": {"code": "ResourceNotFound", "message": "gone"}}
        }))
        .unwrap();

        match item.into_content("/x") {
            Err(CollectError::PerItem { url, status, message }) => {
                assert_eq!(url, "/x");
                assert_eq!(status, 404);
                assert_eq!(message, "gone");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_item_success_returns_content() {
        let item: BatchItem =
            serde_json::from_value(json!({"httpStatusCode": 200, "content": {"value": []}})).unwrap();
        assert_eq!(item.into_content("/x").unwrap(), json!({"value": []}));
    }
}
