//! Label construction
//!
//! Positional labels are read from the segments of a metrics path such as
//! `/subscriptions/<sub>/resourceGroups/<rg>/providers/<ns>/<type>/<name>/providers/microsoft.insights/metrics`.

use super::AzureResource;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Label name to value, ordered by name
pub type Labels = BTreeMap<String, String>;

// Segment positions in a metrics path split on '/'
const RESOURCE_GROUP_POSITION: usize = 4;
const RESOURCE_TYPE_PREFIX_POSITION: usize = 6;
const RESOURCE_TYPE_POSITION: usize = 7;
const RESOURCE_NAME_POSITION: usize = 8;
const RESOURCE_TYPE_SUFFIX_POSITION: usize = 9;
const SUB_RESOURCE_NAME_POSITION: usize = 10;

/// Metrics paths of child resources (database under a server) have at least
/// this many segments
pub const NESTED_RESOURCE_MIN_SEGMENTS: usize = 14;

fn invalid_label_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[^a-zA-Z0-9_]+").expect("static regex"))
}

/// Positional labels for a metrics path. Segments missing from a malformed
/// path are left out rather than reported.
pub fn resource_labels(metrics_path: &str) -> Labels {
    let segments: Vec<&str> = metrics_path.split('/').collect();
    let mut labels = Labels::new();

    let mut put = |key: &str, position: usize| {
        if let Some(value) = segments.get(position) {
            labels.insert(key.to_string(), value.to_string());
        }
    };

    put("resource_group", RESOURCE_GROUP_POSITION);
    put("resource_name", RESOURCE_NAME_POSITION);
    if segments.len() >= NESTED_RESOURCE_MIN_SEGMENTS {
        put("sub_resource_name", SUB_RESOURCE_NAME_POSITION);
    }

    labels
}

/// Resource type with its provider namespace, including the child type for
/// nested resources (`Microsoft.Sql/servers/databases`)
pub fn resource_type(metrics_path: &str) -> Option<String> {
    let segments: Vec<&str> = metrics_path.split('/').collect();

    let mut resource_type = format!(
        "{}/{}",
        segments.get(RESOURCE_TYPE_PREFIX_POSITION)?,
        segments.get(RESOURCE_TYPE_POSITION)?
    );
    if segments.len() >= NESTED_RESOURCE_MIN_SEGMENTS {
        resource_type.push('/');
        resource_type.push_str(segments.get(RESOURCE_TYPE_SUFFIX_POSITION)?);
    }

    Some(resource_type)
}

/// `tag_` + lowercased key, with runs of invalid characters collapsed to `_`
pub fn tag_label_name(key: &str) -> String {
    let name = format!("tag_{}", key.to_lowercase());
    invalid_label_chars().replace_all(&name, "_").into_owned()
}

/// Labels of the info sample: the resource's attributes and tags, then the
/// positional labels, which take precedence on conflicts.
pub fn info_labels(resource: &AzureResource, metrics_path: &str) -> Labels {
    let mut labels = Labels::new();

    for (key, value) in &resource.tags {
        labels.insert(tag_label_name(key), value.clone());
    }

    for (key, value) in resource.label_attributes() {
        labels.insert(key.to_string(), value.to_string());
    }

    labels.extend(resource_labels(metrics_path));
    labels
}
