//! Error types for the collection pipeline

use thiserror::Error;

/// Result type alias for collection operations
pub type Result<T> = std::result::Result<T, CollectError>;

/// Failures raised while collecting metrics from Azure.
///
/// Cycle-fatal variants (`Auth`, `ResourceList`) end up as a single sentinel
/// sample; the remaining variants are absorbed by the collector at the
/// granularity of one batch pass or one resource.
#[derive(Error, Debug)]
pub enum CollectError {
    /// Token endpoint failure
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Configuration rejected during load or reload
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A resource group or tag listing call failed
    #[error("resource listing failed: {0}")]
    ResourceList(String),

    /// The batch call itself failed
    #[error("batch request failed: {0}")]
    BatchTransport(String),

    /// No API version is known for the resource type
    #[error("no API version known for resource type {0}")]
    UnknownResourceType(String),

    /// A sub-request inside a successful batch returned a non-200 status
    #[error("sub-request {url} returned status {status}: {message}")]
    PerItem {
        url: String,
        status: u16,
        message: String,
    },
}

/// Errors raised by the HTTP transport
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API request failed: {status}")]
    Status { status: u16, body: String },

    #[error("failed to parse response JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("collection deadline exceeded")]
    DeadlineExceeded,
}
