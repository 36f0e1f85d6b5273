//! Azure API interaction module
//!
//! This module provides the core functionality for interacting with Azure
//! Resource Manager and Azure Monitor, including authentication, the HTTP
//! client, URL construction, the API version catalog and request batching.
//!
//! # Module Structure
//!
//! - [`auth`] - Client-credential and managed-identity tokens
//! - [`client`] - Main Azure client for making authenticated API requests
//! - [`http`] - HTTP utilities for REST API calls
//! - [`endpoints`] - Resource Manager URL builders
//! - [`catalog`] - Latest API version per resource type
//! - [`batch`] - Batch endpoint request engine
//!
//! # Example
//!
//! ```ignore
//! use azure_exporter::azure::{client::AzureClient, endpoints::Endpoints, http::Deadline};
//!
//! async fn example(client: &AzureClient, endpoints: &Endpoints) -> azure_exporter::error::Result<()> {
//!     let deadline = Deadline::after(std::time::Duration::from_secs(30));
//!     let providers = client
//!         .get(&endpoints.providers_url(), &deadline, |e| {
//!             azure_exporter::error::CollectError::ResourceList(e.to_string())
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod batch;
pub mod catalog;
pub mod client;
pub mod endpoints;
pub mod http;
