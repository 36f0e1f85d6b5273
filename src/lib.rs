//! Prometheus exporter for Azure Monitor metrics.

pub mod azure;
pub mod collector;
pub mod config;
pub mod error;
pub mod listing;
pub mod metrics;
pub mod resource;
pub mod server;

/// Version injected at compile time via AZURE_EXPORTER_VERSION env var (set
/// by CI/CD), or "dev" for local builds.
pub const VERSION: &str = match option_env!("AZURE_EXPORTER_VERSION") {
    Some(v) => v,
    None => "dev",
};
