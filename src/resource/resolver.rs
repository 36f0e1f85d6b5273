//! Resource Resolver
//!
//! Turns resource group and tag specs into concrete resources by listing
//! them through Resource Manager. A resolver lives for exactly one
//! collection cycle; its tag cache dies with it.

use super::AzureResource;
use crate::azure::client::AzureClient;
use crate::azure::endpoints::Endpoints;
use crate::azure::http::Deadline;
use crate::config::{NamePattern, ResourceGroup, ResourceTag, Target};
use crate::error::{CollectError, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Deserialize)]
struct ResourceListResponse {
    #[serde(default)]
    value: Vec<AzureResource>,
    #[serde(default, rename = "nextLink")]
    next_link: Option<String>,
}

pub struct ResourceResolver<'a> {
    client: &'a AzureClient,
    endpoints: &'a Endpoints,
    deadline: &'a Deadline,
    /// Unfiltered tag listings of this cycle, keyed by request URL
    tag_cache: HashMap<String, Vec<AzureResource>>,
}

impl<'a> ResourceResolver<'a> {
    pub fn new(client: &'a AzureClient, endpoints: &'a Endpoints, deadline: &'a Deadline) -> Self {
        Self {
            client,
            endpoints,
            deadline,
            tag_cache: HashMap::new(),
        }
    }

    /// Direct targets need no lookup
    pub fn resolve_target(target: &Target) -> &str {
        &target.resource
    }

    /// Resources of the group matching the configured types and name patterns
    pub async fn resolve_resource_group(&self, group: &ResourceGroup) -> Result<Vec<AzureResource>> {
        let filter = resource_type_filter(&group.resource_types);
        let url = self
            .endpoints
            .resource_group_resources_url(&group.resource_group, &filter);

        let resources = self.list(&url).await.map_err(|e| {
            CollectError::ResourceList(format!(
                "failed to get resources for resource group {} and resource types {:?}: {}",
                group.resource_group, group.resource_types, e
            ))
        })?;

        Ok(filter_by_name(
            resources,
            &group.resource_name_include_re,
            &group.resource_name_exclude_re,
        ))
    }

    /// Resources carrying the configured tag, optionally restricted to types
    pub async fn resolve_resource_tag(&mut self, tag: &ResourceTag) -> Result<Vec<AzureResource>> {
        let filter = tag_filter(&tag.resource_tag_name, &tag.resource_tag_value);
        let url = self.endpoints.subscription_resources_url(&filter);

        let resources = match self.tag_cache.get(&url) {
            Some(cached) => {
                tracing::debug!("Reusing tag listing for {}", url);
                cached.clone()
            }
            None => {
                let listed = self.list(&url).await.map_err(|e| {
                    CollectError::ResourceList(format!(
                        "failed to get resources for tag {}={}: {}",
                        tag.resource_tag_name, tag.resource_tag_value, e
                    ))
                })?;
                self.tag_cache.insert(url, listed.clone());
                listed
            }
        };

        if tag.resource_types.is_empty() {
            Ok(resources)
        } else {
            Ok(filter_by_type(resources, &tag.resource_types))
        }
    }

    /// List every page of a resource listing
    async fn list(&self, url: &str) -> Result<Vec<AzureResource>> {
        let mut resources = Vec::new();
        let mut next = Some(url.to_string());

        while let Some(page_url) = next.take() {
            let body = self
                .client
                .get(&page_url, self.deadline, |e| CollectError::ResourceList(e.to_string()))
                .await?;

            let page: ResourceListResponse = serde_json::from_value(body).map_err(|e| {
                CollectError::ResourceList(format!("malformed resource listing: {}", e))
            })?;

            resources.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
        }

        for resource in &mut resources {
            resource.id = self.endpoints.subscription_relative(&resource.id);
            resource.subscription = self.endpoints.subscription_id().to_string();
        }

        tracing::debug!("Listed {} resources from {}", resources.len(), url);
        Ok(resources)
    }
}

/// `resourcetype eq 'a' or resourcetype eq 'b'`
pub fn resource_type_filter(resource_types: &[String]) -> String {
    resource_types
        .iter()
        .map(|t| format!("resourcetype eq '{}'", t))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// `tagName eq '<name>' and tagValue eq '<value>'`
pub fn tag_filter(name: &str, value: &str) -> String {
    format!(
        "tagName eq '{}' and tagValue eq '{}'",
        escape_filter_value(name),
        escape_filter_value(value)
    )
}

/// Escape single quotes before interpolating into an OData string literal
pub fn escape_filter_value(value: &str) -> String {
    value.replace('\'', "\\'")
}

/// Include/exclude decision for one name. Exclusion always wins.
pub fn is_name_selected(name: &str, include: &[NamePattern], exclude: &[NamePattern]) -> bool {
    let included = include.is_empty() || include.iter().any(|re| re.is_match(name));
    included && !exclude.iter().any(|re| re.is_match(name))
}

pub fn filter_by_name(
    resources: Vec<AzureResource>,
    include: &[NamePattern],
    exclude: &[NamePattern],
) -> Vec<AzureResource> {
    resources
        .into_iter()
        .filter(|r| is_name_selected(r.short_name(), include, exclude))
        .collect()
}

pub fn filter_by_type(resources: Vec<AzureResource>, resource_types: &[String]) -> Vec<AzureResource> {
    let wanted: HashSet<&str> = resource_types.iter().map(String::as_str).collect();
    resources
        .into_iter()
        .filter(|r| wanted.contains(r.resource_type.as_str()))
        .collect()
}
