//! Metric extraction
//!
//! Converts one metric-value response into gauge samples and emits the
//! per-resource info sample once per cycle.

use super::Sample;
use crate::config::Aggregation;
use crate::resource::{labels, ResourceMeta};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

pub const RESOURCE_INFO_METRIC: &str = "azure_resource_info";

#[derive(Debug, Default, Deserialize)]
pub struct MetricValueResponse {
    #[serde(default)]
    pub value: Vec<MetricValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricValue {
    #[serde(default)]
    pub name: LocalizableString,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LocalizableString {
    #[serde(default)]
    pub value: String,
    #[serde(default, rename = "localizedValue")]
    pub localized_value: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeSeries {
    #[serde(default)]
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DataPoint {
    #[serde(default, rename = "timeStamp")]
    pub time_stamp: String,
    pub total: Option<f64>,
    pub average: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl DataPoint {
    pub fn aggregation(&self, aggregation: Aggregation) -> Option<f64> {
        match aggregation {
            Aggregation::Total => self.total,
            Aggregation::Average => self.average,
            Aggregation::Minimum => self.minimum,
            Aggregation::Maximum => self.maximum,
        }
    }
}

/// Exported base name of an Azure metric, e.g. `Percentage CPU` in
/// `Percent` becomes `percentage_cpu_percent`.
pub fn metric_name(name: &str, unit: &str, metric_namespace: &str) -> String {
    let mut metric = format!("{}_{}", name.replace(' ', "_"), unit)
        .to_lowercase()
        .replace('/', "_per_");

    if !metric_namespace.is_empty() {
        metric = format!("{}_{}", metric_namespace.to_lowercase(), metric);
    }

    let mut sanitized: String = metric
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();

    // Metric names must not start with a digit
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

/// Per-cycle extractor; remembers which resources already got their info
/// sample.
#[derive(Debug, Default)]
pub struct MetricExtractor {
    published: HashSet<String>,
}

impl MetricExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples for the latest data point of every metric in `content`
    pub fn extract(&self, meta: &ResourceMeta, content: Value) -> Vec<Sample> {
        let response: MetricValueResponse = match serde_json::from_value(content) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Unparsable metric response for {}: {}", meta.resource_id, e);
                return Vec::new();
            }
        };

        if response.value.is_empty() {
            tracing::warn!("Metric value response for {} is empty", meta.resource_id);
            return Vec::new();
        }

        let labels = meta.labels();
        let mut samples = Vec::new();

        for value in &response.value {
            let display_name = if value.name.value.is_empty() {
                &value.name.localized_value
            } else {
                &value.name.value
            };

            let Some(series) = value.timeseries.first() else {
                tracing::warn!(
                    "Metric {} of {} has no time series",
                    display_name,
                    meta.resource_id
                );
                continue;
            };

            let Some(point) = series.data.last() else {
                tracing::warn!(
                    "Metric {} of {} has no data points",
                    display_name,
                    meta.resource_id
                );
                continue;
            };

            let base = metric_name(display_name, &value.unit, &meta.metric_namespace);
            for aggregation in &meta.aggregations {
                if let Some(v) = point.aggregation(*aggregation) {
                    samples.push(Sample::gauge(
                        format!("{}_{}", base, aggregation.suffix()),
                        format!("Azure Monitor metric {} ({})", display_name, aggregation.as_str()),
                        labels.clone(),
                        v,
                    ));
                }
            }
        }

        samples
    }

    /// The info sample of a resolved resource, the first time it is seen in
    /// this cycle
    pub fn info_sample(&mut self, meta: &ResourceMeta) -> Option<Sample> {
        let resource = meta.resource.as_ref()?;
        if !self.published.insert(meta.resource_id.clone()) {
            return None;
        }

        Some(Sample::gauge(
            RESOURCE_INFO_METRIC,
            "Azure information available for resource",
            labels::info_labels(resource, &meta.metrics_path),
            1.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::endpoints::Endpoints;
    use crate::config::Metric;
    use crate::resource::{AzureResource, TimeWindow};
    use serde_json::json;

    fn meta(resource_id: &str, namespace: &str, aggregations: &[Aggregation]) -> ResourceMeta {
        ResourceMeta::new(
            &Endpoints::new("https://management.azure.com/", "S"),
            resource_id,
            namespace,
            &[Metric {
                name: "Percentage CPU".to_string(),
            }],
            aggregations,
            &TimeWindow::now(),
            None,
        )
    }

    const VM: &str = "/resourceGroups/prod-rg-001/providers/Microsoft.Compute/virtualMachines/prod-vm-01";

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name("Percentage CPU", "Percent", ""), "percentage_cpu_percent");
        assert_eq!(
            metric_name("Disk Read Bytes/sec", "CountPerSecond", ""),
            "disk_read_bytes_per_sec_countpersecond"
        );
        assert_eq!(
            metric_name("Used Capacity", "Bytes", "Microsoft.Storage/storageAccounts"),
            "microsoft_storage_storageaccounts_used_capacity_bytes"
        );
        assert_eq!(metric_name("Http 5xx (%)", "Count", ""), "http_5xx_____count");
    }

    #[test]
    fn test_metric_name_never_starts_with_digit() {
        assert_eq!(metric_name("5xx Errors", "Count", ""), "_5xx_errors_count");
        assert_eq!(
            metric_name("Requests", "Count", "1stParty/apps"),
            "_1stparty_apps_requests_count"
        );
    }

    #[test]
    fn test_extract_uses_last_data_point() {
        let extractor = MetricExtractor::new();
        let content = json!({
            "value": [{
                "name": {"value": "Percentage CPU", "localizedValue": "Percentage CPU"},
                "unit": "Percent",
                "timeseries": [{"data": [
                    {"timeStamp": "t1", "average": 10.0, "maximum": 20.0},
                    {"timeStamp": "t2", "average": 30.0, "maximum": 40.0}
                ]}]
            }]
        });

        let samples = extractor.extract(&meta(VM, "", &[]), content);
        let names: Vec<_> = samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["percentage_cpu_percent_average", "percentage_cpu_percent_max"]
        );
        assert_eq!(samples[0].value, 30.0);
        assert_eq!(samples[1].value, 40.0);
        assert_eq!(samples[0].labels["resource_group"], "prod-rg-001");
        assert_eq!(samples[0].labels["resource_name"], "prod-vm-01");
        assert!(!samples[0].labels.contains_key("sub_resource_name"));
    }

    #[test]
    fn test_extract_respects_aggregation_subset() {
        let extractor = MetricExtractor::new();
        let content = json!({
            "value": [{
                "name": {"value": "Requests"},
                "unit": "Count",
                "timeseries": [{"data": [{"total": 7.0, "average": 1.0, "minimum": 0.0, "maximum": 3.0}]}]
            }]
        });

        let samples = extractor.extract(&meta(VM, "", &[Aggregation::Total]), content);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name, "requests_count_total");
        assert_eq!(samples[0].value, 7.0);
    }

    #[test]
    fn test_empty_series_emit_nothing() {
        let extractor = MetricExtractor::new();
        let m = meta(VM, "", &[]);

        assert!(extractor.extract(&m, json!({"value": []})).is_empty());
        assert!(extractor
            .extract(&m, json!({"value": [{"name": {"value": "x"}, "unit": "Count", "timeseries": []}]}))
            .is_empty());
        assert!(extractor
            .extract(
                &m,
                json!({"value": [{"name": {"value": "x"}, "unit": "Count", "timeseries": [{"data": []}]}]})
            )
            .is_empty());
    }

    #[test]
    fn test_nested_resource_has_sub_resource_label() {
        let extractor = MetricExtractor::new();
        let m = meta(
            "/resourceGroups/prod-rg-002/providers/Microsoft.Sql/servers/sqlprod/databases/prod-db-01",
            "",
            &[Aggregation::Average],
        );
        let samples = extractor.extract(
            &m,
            json!({"value": [{"name": {"value": "dtu_consumption_percent"}, "unit": "Percent",
                "timeseries": [{"data": [{"average": 5.0}]}]}]}),
        );
        assert_eq!(samples[0].labels["sub_resource_name"], "prod-db-01");
        assert_eq!(samples[0].labels["resource_name"], "sqlprod");
    }

    #[test]
    fn test_info_sample_emitted_once_per_resource() {
        let mut extractor = MetricExtractor::new();
        let mut m = meta(VM, "", &[]);
        assert!(extractor.info_sample(&m).is_none());

        m.resource = Some(AzureResource {
            id: VM.to_string(),
            name: "prod-vm-01".to_string(),
            tags: [("Env".to_string(), "prod".to_string())].into_iter().collect(),
            ..Default::default()
        });

        let info = extractor.info_sample(&m).unwrap();
        assert_eq!(info.name, RESOURCE_INFO_METRIC);
        assert_eq!(info.value, 1.0);
        assert_eq!(info.labels["tag_env"], "prod");
        assert!(extractor.info_sample(&m).is_none());
    }
}
