//! Metric samples and exposition
//!
//! A collection cycle returns an ordered `Vec<Sample>`; [`render`] groups the
//! samples into gauge families and encodes them through a per-scrape
//! `prometheus-client` registry.

pub mod extract;

use crate::resource::Labels;
use prometheus_client::collector::Collector;
use prometheus_client::encoding::{text, DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::metrics::MetricType;
use prometheus_client::registry::Registry;
use std::collections::{BTreeMap, HashSet};

/// Content type of the OpenMetrics text format written by [`render`]
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Name of the sample emitted instead of metrics when a cycle fails
pub const COLLECTION_FAILED_METRIC: &str = "azure_exporter_collection_failed";

/// A single gauge sample
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub help: String,
    pub labels: Labels,
    pub value: f64,
}

impl Sample {
    pub fn gauge(name: impl Into<String>, help: impl Into<String>, labels: Labels, value: f64) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            labels,
            value,
        }
    }

    /// Sentinel marking a cycle that could not collect anything
    pub fn collection_failed(stage: &str) -> Self {
        let mut labels = Labels::new();
        labels.insert("stage".to_string(), stage.to_string());
        Self::gauge(
            COLLECTION_FAILED_METRIC,
            "Set when the collection cycle failed before any metric could be fetched",
            labels,
            1.0,
        )
    }
}

#[derive(Debug, Default)]
struct GaugeFamily {
    help: String,
    series: Vec<(Vec<(String, String)>, f64)>,
}

/// Hands the samples of one cycle to the registry at scrape time
#[derive(Debug, Default)]
struct CycleCollector {
    families: BTreeMap<String, GaugeFamily>,
}

impl CycleCollector {
    /// Families are sorted by name; within a family samples keep their order
    /// and duplicates of an already seen label set are dropped.
    fn new(samples: &[Sample]) -> Self {
        let mut families: BTreeMap<String, GaugeFamily> = BTreeMap::new();
        let mut seen: HashSet<(&str, &Labels)> = HashSet::new();

        for sample in samples {
            if !seen.insert((sample.name.as_str(), &sample.labels)) {
                tracing::debug!("Dropping duplicate sample for {} {:?}", sample.name, sample.labels);
                continue;
            }

            let family = families.entry(sample.name.clone()).or_insert_with(|| GaugeFamily {
                help: sample.help.clone(),
                series: Vec::new(),
            });
            let labels = sample
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            family.series.push((labels, sample.value));
        }

        Self { families }
    }
}

impl Collector for CycleCollector {
    fn encode(&self, encoder: &mut DescriptorEncoder) -> Result<(), std::fmt::Error> {
        for (name, family) in &self.families {
            let mut metric_encoder =
                encoder.encode_descriptor(name, &family.help, None, MetricType::Gauge)?;

            for (labels, value) in &family.series {
                let gauge = ConstGauge::new(*value);
                if labels.is_empty() {
                    gauge.encode(&mut metric_encoder)?;
                } else {
                    gauge.encode(&mut metric_encoder.encode_family(labels)?)?;
                }
            }
        }
        Ok(())
    }
}

/// Encode the samples of one cycle in the OpenMetrics text format
pub fn render(samples: &[Sample]) -> String {
    let mut registry = Registry::default();
    registry.register_collector(Box::new(CycleCollector::new(samples)));

    let mut out = String::new();
    if let Err(e) = text::encode(&mut out, &registry) {
        tracing::error!("Failed to encode {} samples: {}", samples.len(), e);
    }
    out
}
