//! Azure Resource Manager URL builders
//!
//! Absolute URLs are used for direct calls; relative URLs (starting at
//! `/subscriptions/...`) are what the batch endpoint expects.

use crate::config::{Aggregation, Config};
use crate::resource::TimeWindow;

const RESOURCE_GROUP_LIST_API_VERSION: &str = "2018-02-01";
const TAG_LIST_API_VERSION: &str = "2018-05-01";
const PROVIDERS_API_VERSION: &str = "2019-05-10";
const BATCH_API_VERSION: &str = "2017-03-01";
pub const METRICS_API_VERSION: &str = "2018-01-01";
const METRIC_DEFINITIONS_API_VERSION: &str = "2018-01-01";
const METRIC_NAMESPACES_API_VERSION: &str = "2017-12-01-preview";

/// URL builders bound to one resource manager and subscription
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: String,
    subscription_id: String,
}

impl Endpoints {
    pub fn new(resource_manager_url: &str, subscription_id: &str) -> Self {
        let mut base = resource_manager_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self {
            base,
            subscription_id: subscription_id.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.resource_manager_url,
            &config.credentials.subscription_id,
        )
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Turn a `/subscriptions/...` relative URL into an absolute one
    pub fn absolute(&self, relative: &str) -> String {
        format!("{}{}", self.base, relative.trim_start_matches('/'))
    }

    // =========================================================================
    // Resource listing
    // =========================================================================

    /// Build subscription-scoped URL
    pub fn subscription_url(&self, path: &str) -> String {
        format!(
            "{}subscriptions/{}/{}",
            self.base,
            self.subscription_id,
            path.trim_start_matches('/')
        )
    }

    /// Resources of a resource group matching an OData filter
    pub fn resource_group_resources_url(&self, resource_group: &str, filter: &str) -> String {
        self.subscription_url(&format!(
            "resourceGroups/{}/resources?api-version={}&$filter={}",
            resource_group,
            RESOURCE_GROUP_LIST_API_VERSION,
            urlencoding::encode(filter)
        ))
    }

    /// Resources of the subscription matching an OData filter
    pub fn subscription_resources_url(&self, filter: &str) -> String {
        self.subscription_url(&format!(
            "resources?api-version={}&$filter={}",
            TAG_LIST_API_VERSION,
            urlencoding::encode(filter)
        ))
    }

    /// Resource provider registrations, used to build the API version catalog
    pub fn providers_url(&self) -> String {
        self.subscription_url(&format!("providers?api-version={}", PROVIDERS_API_VERSION))
    }

    pub fn batch_url(&self) -> String {
        format!("{}batch?api-version={}", self.base, BATCH_API_VERSION)
    }

    // =========================================================================
    // Per-resource URLs
    // =========================================================================

    /// Subscription-qualified path of a subscription-relative resource id
    pub fn resource_path(&self, resource: &str) -> String {
        format!("/subscriptions/{}{}", self.subscription_id, resource)
    }

    /// Path of the metrics endpoint of a resource
    pub fn metrics_path(&self, resource: &str) -> String {
        format!(
            "{}/providers/microsoft.insights/metrics",
            self.resource_path(resource)
        )
    }

    /// Relative metric-value query URL. Query keys are emitted in sorted
    /// order so equal inputs always give the same URL.
    pub fn metrics_relative_url(
        &self,
        resource: &str,
        metric_namespace: &str,
        metric_names: &str,
        aggregations: &[Aggregation],
        window: &TimeWindow,
    ) -> String {
        let aggregation = aggregations
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("aggregation", &aggregation);
        query.append_pair("api-version", METRICS_API_VERSION);
        if !metric_names.is_empty() {
            query.append_pair("metricnames", metric_names);
        }
        if !metric_namespace.is_empty() {
            query.append_pair("metricnamespace", metric_namespace);
        }
        query.append_pair("timespan", &window.timespan());

        format!("{}?{}", self.metrics_path(resource), query.finish())
    }

    /// Relative resource-detail lookup URL
    pub fn resource_relative_url(&self, resource: &str, api_version: &str) -> String {
        format!(
            "{}?api-version={}",
            self.resource_path(resource),
            urlencoding::encode(api_version)
        )
    }

    pub fn metric_definitions_url(&self, resource: &str, metric_namespace: &str) -> String {
        let mut url = format!(
            "{}/providers/microsoft.insights/metricDefinitions?api-version={}",
            self.absolute(&self.resource_path(resource)),
            METRIC_DEFINITIONS_API_VERSION
        );
        if !metric_namespace.is_empty() {
            url.push_str("&metricnamespace=");
            url.push_str(&urlencoding::encode(metric_namespace));
        }
        url
    }

    pub fn metric_namespaces_url(&self, resource: &str) -> String {
        format!(
            "{}/providers/microsoft.insights/metricNamespaces?api-version={}",
            self.absolute(&self.resource_path(resource)),
            METRIC_NAMESPACES_API_VERSION
        )
    }

    /// Strip the `/subscriptions/<id>` prefix from an id returned by Azure
    pub fn subscription_relative(&self, id: &str) -> String {
        let mut segments = id.splitn(4, '/');
        match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(""), Some(s), Some(_), rest) if s.eq_ignore_ascii_case("subscriptions") => {
                format!("/{}", rest.unwrap_or(""))
            }
            _ => id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn endpoints() -> Endpoints {
        Endpoints::new("https://management.azure.com", "sub-1")
    }

    #[test]
    fn test_batch_url_normalizes_trailing_slash() {
        assert_eq!(
            endpoints().batch_url(),
            "https://management.azure.com/batch?api-version=2017-03-01"
        );
        assert_eq!(
            Endpoints::new("https://management.azure.com/", "s").batch_url(),
            "https://management.azure.com/batch?api-version=2017-03-01"
        );
    }

    #[test]
    fn test_resource_group_url_encodes_filter() {
        let url = endpoints().resource_group_resources_url("rg", "resourcetype eq 'A/b'");
        assert_eq!(
            url,
            "https://management.azure.com/subscriptions/sub-1/resourceGroups/rg/resources\
             ?api-version=2018-02-01&$filter=resourcetype%20eq%20%27A%2Fb%27"
        );
    }

    #[test]
    fn test_metrics_url_is_deterministic() {
        let window = TimeWindow::ending_at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let url = endpoints().metrics_relative_url(
            "/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1",
            "",
            "Percentage CPU,Network In",
            &[Aggregation::Average, Aggregation::Maximum],
            &window,
        );
        assert_eq!(
            url,
            "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1\
             /providers/microsoft.insights/metrics?aggregation=Average%2CMaximum&api-version=2018-01-01\
             &metricnames=Percentage+CPU%2CNetwork+In\
             &timespan=2024-05-01T11%3A56%3A00Z%2F2024-05-01T11%3A57%3A00Z"
        );
    }

    #[test]
    fn test_subscription_relative() {
        let e = endpoints();
        assert_eq!(
            e.subscription_relative("/subscriptions/sub-1/resourceGroups/rg/providers/X/y/z"),
            "/resourceGroups/rg/providers/X/y/z"
        );
        assert_eq!(e.subscription_relative("/resourceGroups/rg"), "/resourceGroups/rg");
    }

    #[test]
    fn test_metric_namespaces_url() {
        assert_eq!(
            endpoints().metric_namespaces_url("/resourceGroups/rg/providers/X/y/z"),
            "https://management.azure.com/subscriptions/sub-1/resourceGroups/rg/providers/X/y/z\
             /providers/microsoft.insights/metricNamespaces?api-version=2017-12-01-preview"
        );
    }
}
