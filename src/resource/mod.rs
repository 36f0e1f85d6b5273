//! Resource abstraction layer
//!
//! Types describing the Azure resources a collection cycle works on, and how
//! configured targets, resource groups and tags are turned into them.
//!
//! # Architecture
//!
//! - [`resolver`] - Resolves resource group and tag specs through listing calls
//! - [`labels`] - Positional and descriptive label construction

pub mod labels;
pub mod resolver;

use crate::azure::endpoints::Endpoints;
use crate::config::{effective_aggregations, joined_metric_names, Aggregation, Metric};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

pub use labels::Labels;

/// Query delay: Azure Monitor data for the last few minutes is incomplete
const QUERY_DELAY_MINUTES: i64 = 3;
const QUERY_WINDOW_MINUTES: i64 = 1;

/// Resolved resource identity as returned by Resource Manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AzureResource {
    /// Subscription-relative id once resolved
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(default, rename = "type", deserialize_with = "null_as_default")]
    pub resource_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, rename = "managedBy", deserialize_with = "null_as_default")]
    pub managed_by: String,
    #[serde(skip)]
    pub subscription: String,
}

impl AzureResource {
    /// Last path segment of the name (`server/db` -> `db`)
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// String attributes exported on the info sample, in label order
    pub fn label_attributes(&self) -> [(&'static str, &str); 6] {
        [
            ("id", self.id.as_str()),
            ("resource_name", self.name.as_str()),
            ("azure_location", self.location.as_str()),
            ("resource_type", self.resource_type.as_str()),
            ("managed_by", self.managed_by.as_str()),
            ("azure_subscription", self.subscription.as_str()),
        ]
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The metric query window shared by every request of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn now() -> Self {
        Self::ending_at(Utc::now())
    }

    pub fn ending_at(now: DateTime<Utc>) -> Self {
        Self {
            start: now - TimeDelta::minutes(QUERY_DELAY_MINUTES + QUERY_WINDOW_MINUTES),
            end: now - TimeDelta::minutes(QUERY_DELAY_MINUTES),
        }
    }

    /// ISO-8601 interval `start/end`
    pub fn timespan(&self) -> String {
        format!(
            "{}/{}",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// One resource to collect during one cycle
#[derive(Debug, Clone)]
pub struct ResourceMeta {
    pub resource_id: String,
    /// Relative metric-value URL, reused verbatim as a batch sub-request
    pub metric_url: String,
    /// `/subscriptions/<sub><id>/providers/microsoft.insights/metrics`
    pub metrics_path: String,
    pub metric_namespace: String,
    pub metric_names: String,
    pub aggregations: Vec<Aggregation>,
    pub resource: Option<AzureResource>,
}

impl ResourceMeta {
    pub fn new(
        endpoints: &Endpoints,
        resource_id: &str,
        metric_namespace: &str,
        metrics: &[Metric],
        aggregations: &[Aggregation],
        window: &TimeWindow,
        resource: Option<AzureResource>,
    ) -> Self {
        let aggregations = effective_aggregations(aggregations);
        let metric_names = joined_metric_names(metrics);
        let metric_url = endpoints.metrics_relative_url(
            resource_id,
            metric_namespace,
            &metric_names,
            &aggregations,
            window,
        );

        Self {
            resource_id: resource_id.to_string(),
            metric_url,
            metrics_path: endpoints.metrics_path(resource_id),
            metric_namespace: metric_namespace.to_string(),
            metric_names,
            aggregations,
            resource,
        }
    }

    /// `resource_group`, `resource_name` and, for nested resources,
    /// `sub_resource_name`
    pub fn labels(&self) -> Labels {
        labels::resource_labels(&self.metrics_path)
    }

    /// `<namespace>/<type>[/<child type>]`
    pub fn resource_type(&self) -> Option<String> {
        labels::resource_type(&self.metrics_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_resource_deserializes_nulls() {
        let resource: AzureResource = serde_json::from_value(json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Web/sites/app",
            "name": "app",
            "type": "Microsoft.Web/sites",
            "location": "westeurope",
            "tags": null,
            "managedBy": null
        }))
        .unwrap();
        assert!(resource.tags.is_empty());
        assert_eq!(resource.managed_by, "");
        assert_eq!(resource.resource_type, "Microsoft.Web/sites");
    }

    #[test]
    fn test_short_name_of_nested_resource() {
        let resource = AzureResource {
            name: "sqlprod/prod-db-01".to_string(),
            ..Default::default()
        };
        assert_eq!(resource.short_name(), "prod-db-01");
    }

    #[test]
    fn test_time_window_lags_three_minutes() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let window = TimeWindow::ending_at(now);
        assert_eq!(window.timespan(), "2024-05-01T11:56:00Z/2024-05-01T11:57:00Z");
    }

    #[test]
    fn test_meta_expands_empty_aggregations() {
        let endpoints = Endpoints::new("https://management.azure.com/", "S");
        let window = TimeWindow::now();
        let meta = ResourceMeta::new(
            &endpoints,
            "/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm",
            "",
            &[Metric {
                name: "Percentage CPU".to_string(),
            }],
            &[],
            &window,
            None,
        );
        assert_eq!(meta.aggregations, Aggregation::ALL.to_vec());
        assert!(meta.metric_url.contains("aggregation=Total%2CAverage%2CMinimum%2CMaximum"));
        assert_eq!(
            meta.resource_type().as_deref(),
            Some("Microsoft.Compute/virtualMachines")
        );
    }
}
