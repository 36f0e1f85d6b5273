//! API version catalog
//!
//! Maps `"<namespace>/<resourceType>"` to the most recent API version offered
//! by the resource provider. Resource-detail lookups need it; metric queries
//! use a fixed version instead.

use super::client::AzureClient;
use super::endpoints::Endpoints;
use super::http::Deadline;
use crate::error::{CollectError, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct ProvidersResponse {
    #[serde(default)]
    value: Vec<Provider>,
}

#[derive(Debug, Deserialize)]
struct Provider {
    #[serde(default)]
    namespace: String,
    #[serde(default, rename = "resourceTypes")]
    resource_types: Vec<ProviderResourceType>,
}

#[derive(Debug, Deserialize)]
struct ProviderResourceType {
    #[serde(rename = "resourceType")]
    resource_type: String,
    #[serde(default, rename = "apiVersions")]
    api_versions: Vec<String>,
}

/// Immutable after construction
#[derive(Debug, Clone, Default)]
pub struct ApiVersionCatalog {
    versions: HashMap<String, String>,
}

impl ApiVersionCatalog {
    /// Fetch the provider registrations of the subscription and build the catalog
    pub async fn build(client: &AzureClient, endpoints: &Endpoints, deadline: &Deadline) -> Result<Self> {
        let response = client
            .get(&endpoints.providers_url(), deadline, |e| {
                CollectError::ResourceList(format!("failed to list resource providers: {}", e))
            })
            .await?;

        let catalog = Self::from_response(response)?;
        tracing::info!("Loaded API versions for {} resource types", catalog.len());
        Ok(catalog)
    }

    pub fn from_response(response: Value) -> Result<Self> {
        let providers: ProvidersResponse = serde_json::from_value(response).map_err(|e| {
            CollectError::ResourceList(format!("malformed provider listing: {}", e))
        })?;

        let mut versions = HashMap::new();
        for provider in &providers.value {
            for entry in &provider.resource_types {
                if let Some(latest) = latest_version(&entry.api_versions) {
                    versions.insert(
                        format!("{}/{}", provider.namespace, entry.resource_type),
                        latest.to_string(),
                    );
                }
            }
        }

        Ok(Self { versions })
    }

    /// Exact-match lookup of the latest API version for a resource type
    pub fn lookup(&self, resource_type: &str) -> Result<&str> {
        self.versions
            .get(resource_type)
            .map(String::as_str)
            .ok_or_else(|| CollectError::UnknownResourceType(resource_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl FromIterator<(String, String)> for ApiVersionCatalog {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            versions: iter.into_iter().collect(),
        }
    }
}

/// Pick the version with the latest `YYYY-MM-DD` prefix. Versions without a
/// parsable date are skipped; on equal dates the first one listed wins.
pub fn latest_version(versions: &[String]) -> Option<&str> {
    let mut latest: Option<(NaiveDate, &str)> = None;

    for version in versions {
        let date = match version
            .get(..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        {
            Some(date) => date,
            None => {
                tracing::warn!("Skipping unparsable API version {:?}", version);
                continue;
            }
        };

        if latest.map_or(true, |(best, _)| best < date) {
            latest = Some((date, version.as_str()));
        }
    }

    latest.map(|(_, version)| version)
}
