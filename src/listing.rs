//! One-shot metric discovery
//!
//! Backs `--list-definitions` and `--list-namespaces`: walks every target and
//! every resolved resource-group and tag resource, asks Azure Monitor what it
//! can report for them, and returns printable reports.

use crate::azure::client::AzureClient;
use crate::azure::endpoints::Endpoints;
use crate::azure::http::Deadline;
use crate::config::Config;
use crate::error::{CollectError, Result};
use crate::resource::resolver::ResourceResolver;
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Default, Deserialize)]
pub struct MetricDefinitionResponse {
    #[serde(default)]
    pub value: Vec<MetricDefinition>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricDefinition {
    #[serde(default)]
    pub name: DefinitionName,
    #[serde(default)]
    pub unit: String,
    #[serde(default, rename = "primaryAggregationType")]
    pub primary_aggregation_type: String,
    #[serde(default)]
    pub dimensions: Vec<DefinitionName>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DefinitionName {
    #[serde(default)]
    pub value: String,
    #[serde(default, rename = "localizedValue")]
    pub localized_value: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricNamespaceResponse {
    #[serde(default)]
    pub value: Vec<MetricNamespace>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricNamespace {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub properties: MetricNamespaceProperties,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricNamespaceProperties {
    #[serde(default, rename = "metricNamespaceName")]
    pub metric_namespace_name: String,
}

/// What to list for each resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingKind {
    Definitions,
    Namespaces,
}

/// Listing result of one resource
#[derive(Debug)]
pub enum Report {
    Definitions {
        resource: String,
        metric_namespace: String,
        definitions: Vec<MetricDefinition>,
    },
    Namespaces {
        resource: String,
        namespaces: Vec<MetricNamespace>,
    },
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Definitions {
                resource,
                metric_namespace,
                definitions,
            } => {
                write!(f, "Resource: {}", resource)?;
                if !metric_namespace.is_empty() {
                    write!(f, " (Metric namespace: {})", metric_namespace)?;
                }
                writeln!(f)?;
                writeln!(f, "Available Metrics:")?;
                for d in definitions {
                    write!(
                        f,
                        "- {} ({}, primary aggregation: {})",
                        d.name.value, d.unit, d.primary_aggregation_type
                    )?;
                    if !d.dimensions.is_empty() {
                        let dims: Vec<&str> = d.dimensions.iter().map(|x| x.value.as_str()).collect();
                        write!(f, " dimensions: {}", dims.join(", "))?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            Report::Namespaces {
                resource,
                namespaces,
            } => {
                writeln!(f, "Resource: {}", resource)?;
                writeln!(f, "Available namespaces:")?;
                for ns in namespaces {
                    writeln!(
                        f,
                        "- {} ({})",
                        ns.properties.metric_namespace_name, ns.classification
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// Collect reports for every configured resource
pub async fn list(
    client: &AzureClient,
    config: &Config,
    kind: ListingKind,
    deadline: &Deadline,
) -> Result<Vec<Report>> {
    let endpoints = Endpoints::from_config(config);
    let mut resolver = ResourceResolver::new(client, &endpoints, deadline);

    // (resource id, metric namespace)
    let mut resources: Vec<(String, String)> = config
        .targets
        .iter()
        .map(|t| (t.resource.clone(), t.metric_namespace.clone()))
        .collect();

    for group in &config.resource_groups {
        for r in resolver.resolve_resource_group(group).await? {
            resources.push((r.id, group.metric_namespace.clone()));
        }
    }
    for tag in &config.resource_tags {
        for r in resolver.resolve_resource_tag(tag).await? {
            resources.push((r.id, tag.metric_namespace.clone()));
        }
    }

    let mut reports = Vec::with_capacity(resources.len());
    for (resource, metric_namespace) in resources {
        let report = match kind {
            ListingKind::Definitions => {
                let url = endpoints.metric_definitions_url(&resource, &metric_namespace);
                let body = client.get(&url, deadline, |e| listing_error(&resource, e)).await?;
                let response: MetricDefinitionResponse = serde_json::from_value(body)
                    .map_err(|e| listing_error(&resource, e))?;
                Report::Definitions {
                    resource,
                    metric_namespace,
                    definitions: response.value,
                }
            }
            ListingKind::Namespaces => {
                let url = endpoints.metric_namespaces_url(&resource);
                let body = client.get(&url, deadline, |e| listing_error(&resource, e)).await?;
                let response: MetricNamespaceResponse = serde_json::from_value(body)
                    .map_err(|e| listing_error(&resource, e))?;
                Report::Namespaces {
                    resource,
                    namespaces: response.value,
                }
            }
        };
        reports.push(report);
    }

    Ok(reports)
}

fn listing_error(resource: &str, e: impl fmt::Display) -> CollectError {
    CollectError::ResourceList(format!("failed to list metrics of {}: {}", resource, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definitions_report() {
        let response: MetricDefinitionResponse = serde_json::from_value(json!({
            "value": [{
                "name": {"value": "Percentage CPU", "localizedValue": "Percentage CPU"},
                "unit": "Percent",
                "primaryAggregationType": "Average",
                "dimensions": []
            }]
        }))
        .unwrap();

        let report = Report::Definitions {
            resource: "/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1".to_string(),
            metric_namespace: String::new(),
            definitions: response.value,
        };

        assert_eq!(
            report.to_string(),
            "Resource: /resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1\n\
             Available Metrics:\n\
             - Percentage CPU (Percent, primary aggregation: Average)\n"
        );
    }

    #[test]
    fn test_namespaces_report() {
        let response: MetricNamespaceResponse = serde_json::from_value(json!({
            "value": [{
                "name": "Microsoft.Storage-storageAccounts",
                "classification": "Platform",
                "properties": {"metricNamespaceName": "Microsoft.Storage/storageAccounts"}
            }]
        }))
        .unwrap();

        let report = Report::Namespaces {
            resource: "/r".to_string(),
            namespaces: response.value,
        };
        assert!(report
            .to_string()
            .contains("- Microsoft.Storage/storageAccounts (Platform)\n"));
    }
}
