//! Configuration Management
//!
//! Loads and validates the exporter's YAML configuration and keeps the live
//! snapshot that collection cycles read from.

use crate::error::{CollectError, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com/";
pub const DEFAULT_RESOURCE_MANAGER_URL: &str = "https://management.azure.com/";
pub const DEFAULT_MANAGED_IDENTITY_URL: &str =
    "http://169.254.169.254/metadata/identity/oauth2/token";

/// Exporter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_authority_url")]
    pub active_directory_authority_url: String,
    #[serde(default = "default_resource_manager_url")]
    pub resource_manager_url: String,
    /// Token endpoint used when no client id is configured
    #[serde(default = "default_managed_identity_url")]
    pub managed_identity_url: String,
    pub credentials: Credentials,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub resource_groups: Vec<ResourceGroup>,
    #[serde(default)]
    pub resource_tags: Vec<ResourceTag>,
}

fn default_authority_url() -> String {
    DEFAULT_AUTHORITY_URL.to_string()
}

fn default_resource_manager_url() -> String {
    DEFAULT_RESOURCE_MANAGER_URL.to_string()
}

fn default_managed_identity_url() -> String {
    DEFAULT_MANAGED_IDENTITY_URL.to_string()
}

/// Azure credentials. An empty `client_id` selects managed identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub subscription_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub tenant_id: String,
}

impl Credentials {
    pub fn uses_managed_identity(&self) -> bool {
        self.client_id.is_empty()
    }
}

/// A statically named resource
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub resource: String,
    #[serde(default)]
    pub metric_namespace: String,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
}

/// Resources of the given types inside a resource group
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceGroup {
    pub resource_group: String,
    #[serde(default)]
    pub metric_namespace: String,
    #[serde(default)]
    pub resource_types: Vec<String>,
    #[serde(default)]
    pub resource_name_include_re: Vec<NamePattern>,
    #[serde(default)]
    pub resource_name_exclude_re: Vec<NamePattern>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
}

/// Resources carrying a tag name/value pair
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceTag {
    pub resource_tag_name: String,
    pub resource_tag_value: String,
    #[serde(default)]
    pub metric_namespace: String,
    #[serde(default)]
    pub resource_types: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metric {
    pub name: String,
}

/// Comma separated metric names as expected by the `metricnames` parameter
pub fn joined_metric_names(metrics: &[Metric]) -> String {
    metrics
        .iter()
        .map(|m| m.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Aggregation kinds supported by Azure Monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Aggregation {
    Total,
    Average,
    Minimum,
    Maximum,
}

impl Aggregation {
    pub const ALL: [Aggregation; 4] = [
        Aggregation::Total,
        Aggregation::Average,
        Aggregation::Minimum,
        Aggregation::Maximum,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Total => "Total",
            Self::Average => "Average",
            Self::Minimum => "Minimum",
            Self::Maximum => "Maximum",
        }
    }

    /// Suffix appended to the exported metric name
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::Average => "average",
            Self::Minimum => "min",
            Self::Maximum => "max",
        }
    }
}

/// Expand an aggregation subset; an empty subset means all four kinds.
pub fn effective_aggregations(subset: &[Aggregation]) -> Vec<Aggregation> {
    if subset.is_empty() {
        Aggregation::ALL.to_vec()
    } else {
        subset.to_vec()
    }
}

/// Resource name pattern, always matched against the whole name
#[derive(Debug, Clone)]
pub struct NamePattern(Regex);

impl NamePattern {
    pub fn new(pattern: &str) -> std::result::Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{})$", pattern)).map(Self)
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.0.is_match(name)
    }
}

impl<'de> Deserialize<'de> for NamePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Self::new(&pattern).map_err(serde::de::Error::custom)
    }
}

impl Config {
    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| CollectError::Config(format!("error parsing config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CollectError::Config(format!("error reading config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.credentials.subscription_id.is_empty() {
            return invalid("subscription_id needs to be specified in credentials");
        }

        for t in &self.targets {
            if t.resource.is_empty() {
                return invalid("resource needs to be specified in each target");
            }
            if !t.resource.starts_with('/') {
                return invalid(&format!("resource path {:?} must start with a /", t.resource));
            }
            if t.metrics.is_empty() {
                return invalid("at least one metric needs to be specified in each target");
            }
        }

        for g in &self.resource_groups {
            if g.resource_group.is_empty() {
                return invalid("resource_group needs to be specified in each resource group");
            }
            if g.resource_types.is_empty() {
                return invalid(
                    "at least one resource type needs to be specified in each resource group",
                );
            }
            if g.metrics.is_empty() {
                return invalid("at least one metric needs to be specified in each resource group");
            }
        }

        for t in &self.resource_tags {
            if t.resource_tag_name.is_empty() {
                return invalid("resource_tag_name needs to be specified in each resource tag");
            }
            if t.resource_tag_value.is_empty() {
                return invalid("resource_tag_value needs to be specified in each resource tag");
            }
            if t.metrics.is_empty() {
                return invalid("at least one metric needs to be specified in each resource tag");
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(CollectError::Config(message.to_string()))
}

/// The live configuration, swapped atomically on reload.
///
/// Readers take an `Arc` of the current snapshot and release the lock right
/// away, so a cycle always sees one consistent configuration and a reload
/// never waits for a cycle to finish.
pub struct SharedConfig {
    path: Option<PathBuf>,
    current: RwLock<Arc<Config>>,
}

impl SharedConfig {
    /// Wrap an already validated configuration that has no backing file
    pub fn new(config: Config) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = Config::load(&path)?;
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read the file; on error the previous snapshot stays live.
    pub fn reload(&self) -> Result<Arc<Config>> {
        let Some(path) = self.path.as_deref() else {
            return Err(CollectError::Config(
                "configuration was not loaded from a file".to_string(),
            ));
        };

        let config = Arc::new(Config::load(path)?);
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config.clone();
        tracing::info!("Configuration reloaded from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
credentials:
  subscription_id: "sub-1"
  client_id: "client"
  client_secret: "secret"
  tenant_id: "tenant"
targets:
  - resource: "/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1"
    metrics:
      - name: "Percentage CPU"
    aggregations: [Average, Maximum]
resource_groups:
  - resource_group: "webapps"
    resource_types: ["Microsoft.Web/sites"]
    resource_name_include_re: ["app-.*"]
    resource_name_exclude_re: ["app-test"]
    metrics:
      - name: "Requests"
resource_tags:
  - resource_tag_name: "monitoring"
    resource_tag_value: "enabled"
    metrics:
      - name: "Percentage CPU"
"#;

    #[test]
    fn test_parses_sample_config() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.resource_manager_url, DEFAULT_RESOURCE_MANAGER_URL);
        assert_eq!(config.targets.len(), 1);
        assert_eq!(
            config.targets[0].aggregations,
            vec![Aggregation::Average, Aggregation::Maximum]
        );
        assert_eq!(config.resource_groups[0].resource_name_include_re.len(), 1);
        assert!(!config.credentials.uses_managed_identity());
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let yaml = format!("{}\nunexpected: true\n", SAMPLE);
        assert!(matches!(Config::from_yaml(&yaml), Err(CollectError::Config(_))));
    }

    #[test]
    fn test_rejects_relative_resource_path() {
        let yaml = r#"
credentials:
  subscription_id: "sub-1"
targets:
  - resource: "resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1"
    metrics:
      - name: "Percentage CPU"
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("must start with a /"));
    }

    #[test]
    fn test_rejects_unknown_aggregation() {
        let yaml = r#"
credentials:
  subscription_id: "sub-1"
targets:
  - resource: "/resourceGroups/rg"
    metrics:
      - name: "Percentage CPU"
    aggregations: [Median]
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_resource_group_requires_types() {
        let yaml = r#"
credentials:
  subscription_id: "sub-1"
resource_groups:
  - resource_group: "rg"
    metrics:
      - name: "Requests"
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("resource type"));
    }

    #[test]
    fn test_name_pattern_is_anchored() {
        let pattern = NamePattern::new("app-[0-9]+").unwrap();
        assert!(pattern.is_match("app-12"));
        assert!(!pattern.is_match("my-app-12"));
        assert!(!pattern.is_match("app-12-old"));

        let alternation = NamePattern::new("a|b").unwrap();
        assert!(alternation.is_match("a"));
        assert!(!alternation.is_match("ab"));
    }

    #[test]
    fn test_empty_aggregations_expand_to_all() {
        assert_eq!(effective_aggregations(&[]), Aggregation::ALL.to_vec());
        assert_eq!(
            effective_aggregations(&[Aggregation::Total]),
            vec![Aggregation::Total]
        );
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let shared = SharedConfig::load(file.path()).unwrap();
        let before = shared.snapshot();

        std::fs::write(file.path(), "credentials: [not, a, map]").unwrap();
        assert!(shared.reload().is_err());

        let after = shared.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
    }
}
