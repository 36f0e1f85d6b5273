//! Collection orchestrator
//!
//! One scrape request runs one [`CollectionCycle`]:
//! token refresh, resource resolution, resource detail lookup (batched),
//! metric value fetch (batched), then extraction. Only the token, the API
//! version catalog and the configuration outlive a cycle.

use crate::azure::auth::AuthSettings;
use crate::azure::batch::BatchRequestEngine;
use crate::azure::catalog::ApiVersionCatalog;
use crate::azure::client::AzureClient;
use crate::azure::endpoints::Endpoints;
use crate::azure::http::Deadline;
use crate::config::{Config, SharedConfig};
use crate::error::{CollectError, Result};
use crate::metrics::extract::MetricExtractor;
use crate::metrics::Sample;
use crate::resource::resolver::ResourceResolver;
use crate::resource::{AzureResource, ResourceMeta, TimeWindow};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Steps of a collection cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TokenRefresh,
    ResolveResources,
    LookupResourceDetails,
    FetchMetricValues,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenRefresh => "token_refresh",
            Self::ResolveResources => "resolve_resources",
            Self::LookupResourceDetails => "lookup_resource_details",
            Self::FetchMetricValues => "fetch_metric_values",
        }
    }
}

/// A configuration snapshot and the client authenticated for it. Cycles
/// take both at once, so a reload can never pair a new subscription with the
/// previous credentials.
pub struct Generation {
    pub config: Arc<Config>,
    pub client: AzureClient,
}

/// Everything shared between cycles
pub struct Exporter {
    current: RwLock<Arc<Generation>>,
    catalog: Arc<ApiVersionCatalog>,
    config: Arc<SharedConfig>,
    reloading: Mutex<()>,
    scrape_timeout: Duration,
}

impl Exporter {
    pub fn new(
        client: AzureClient,
        catalog: ApiVersionCatalog,
        config: Arc<SharedConfig>,
        scrape_timeout: Duration,
    ) -> Self {
        let generation = Generation {
            config: config.snapshot(),
            client,
        };
        Self {
            current: RwLock::new(Arc::new(generation)),
            catalog: Arc::new(catalog),
            config,
            reloading: Mutex::new(()),
            scrape_timeout,
        }
    }

    /// Build the client, acquire a first token and load the API version
    /// catalog
    pub async fn initialize(config: Arc<SharedConfig>, scrape_timeout: Duration) -> Result<Self> {
        let snapshot = config.snapshot();
        let client = AzureClient::new(AuthSettings::from_config(&snapshot))?;
        let deadline = Deadline::after(scrape_timeout);

        client.ensure_token(&deadline).await?;
        let catalog =
            ApiVersionCatalog::build(&client, &Endpoints::from_config(&snapshot), &deadline).await?;

        Ok(Self::new(client, catalog, config, scrape_timeout))
    }

    pub fn generation(&self) -> Arc<Generation> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run one full collection cycle against the current configuration
    pub async fn collect(&self) -> Vec<Sample> {
        let generation = self.generation();
        let cycle = CollectionCycle::new(
            &generation.client,
            &self.catalog,
            &generation.config,
            Deadline::after(self.scrape_timeout),
        );
        cycle.run().await
    }

    /// Reload the configuration file. A rejected file leaves everything as
    /// it was. The cached token is kept unless the auth settings changed.
    pub async fn reload(&self) -> Result<()> {
        let _reloading = self.reloading.lock().await;

        let config = self.config.reload()?;
        let previous = self.generation();
        let settings = AuthSettings::from_config(&config);

        let client = if previous.client.tokens.settings() == &settings {
            previous.client.clone()
        } else {
            tracing::info!("Credentials changed, using a new access token");
            AzureClient::new(settings)?
        };

        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(Generation { config, client });
        Ok(())
    }
}

/// State of a single scrape
pub struct CollectionCycle<'a> {
    client: &'a AzureClient,
    catalog: &'a ApiVersionCatalog,
    config: &'a Config,
    endpoints: Endpoints,
    deadline: Deadline,
    window: TimeWindow,
}

impl<'a> CollectionCycle<'a> {
    pub fn new(
        client: &'a AzureClient,
        catalog: &'a ApiVersionCatalog,
        config: &'a Config,
        deadline: Deadline,
    ) -> Self {
        Self {
            client,
            catalog,
            config,
            endpoints: Endpoints::from_config(config),
            deadline,
            window: TimeWindow::now(),
        }
    }

    pub async fn run(&self) -> Vec<Sample> {
        let started = Instant::now();

        if let Err(e) = self.client.ensure_token(&self.deadline).await {
            tracing::error!("Collection aborted, failed to refresh access token: {}", e);
            return vec![Sample::collection_failed(Stage::TokenRefresh.as_str())];
        }

        let mut metas = match self.resolve_resources().await {
            Ok(metas) => metas,
            Err(e) => {
                tracing::error!("Collection aborted, failed to resolve resources: {}", e);
                return vec![Sample::collection_failed(Stage::ResolveResources.as_str())];
            }
        };

        let skipped = self.lookup_resource_details(&mut metas).await;
        if !skipped.is_empty() {
            metas = metas
                .into_iter()
                .enumerate()
                .filter(|(index, _)| !skipped.contains(index))
                .map(|(_, meta)| meta)
                .collect();
        }
        let samples = self.fetch_metric_values(&metas).await;

        tracing::info!(
            "Collected {} samples for {} resources in {:?}",
            samples.len(),
            metas.len(),
            started.elapsed()
        );
        samples
    }

    /// Build this cycle's unit of work from targets, resource groups and tags
    pub async fn resolve_resources(&self) -> Result<Vec<ResourceMeta>> {
        let mut resolver = ResourceResolver::new(self.client, &self.endpoints, &self.deadline);
        let mut metas = Vec::new();

        for target in &self.config.targets {
            metas.push(ResourceMeta::new(
                &self.endpoints,
                ResourceResolver::resolve_target(target),
                &target.metric_namespace,
                &target.metrics,
                &target.aggregations,
                &self.window,
                None,
            ));
        }

        for group in &self.config.resource_groups {
            for resource in resolver.resolve_resource_group(group).await? {
                let id = resource.id.clone();
                metas.push(ResourceMeta::new(
                    &self.endpoints,
                    &id,
                    &group.metric_namespace,
                    &group.metrics,
                    &group.aggregations,
                    &self.window,
                    Some(resource),
                ));
            }
        }

        for tag in &self.config.resource_tags {
            for resource in resolver.resolve_resource_tag(tag).await? {
                let id = resource.id.clone();
                metas.push(ResourceMeta::new(
                    &self.endpoints,
                    &id,
                    &tag.metric_namespace,
                    &tag.metrics,
                    &tag.aggregations,
                    &self.window,
                    Some(resource),
                ));
            }
        }

        Ok(metas)
    }

    /// Fetch full resource records for resources that do not have one yet.
    /// Returns the positions of resources whose type has no known API
    /// version; those are dropped from the cycle. Lookup failures only cost
    /// the affected resources their info sample.
    pub async fn lookup_resource_details(&self, metas: &mut [ResourceMeta]) -> HashSet<usize> {
        let mut skipped = HashSet::new();
        let mut pending = Vec::new();
        let mut urls = Vec::new();

        for (index, meta) in metas.iter().enumerate() {
            if meta.resource.is_some() {
                continue;
            }

            let api_version = meta
                .resource_type()
                .ok_or_else(|| CollectError::UnknownResourceType(meta.resource_id.clone()))
                .and_then(|resource_type| self.catalog.lookup(&resource_type).map(str::to_string));

            match api_version {
                Ok(version) => {
                    pending.push(index);
                    urls.push(self.endpoints.resource_relative_url(&meta.resource_id, &version));
                }
                Err(e) => {
                    tracing::warn!("Skipping resource {}: {}", meta.resource_id, e);
                    skipped.insert(index);
                }
            }
        }

        if urls.is_empty() {
            return skipped;
        }

        let results = BatchRequestEngine::new(self.client, &self.endpoints)
            .execute(&urls, &self.deadline)
            .await;

        if let Some(e) = &results.failure {
            tracing::warn!(
                "{} failed, {} of {} lookups incomplete: {}",
                Stage::LookupResourceDetails.as_str(),
                urls.len() - results.items.len(),
                urls.len(),
                e
            );
        }

        for ((index, url), item) in pending.iter().zip(&urls).zip(results.items) {
            let meta = &mut metas[*index];
            match item.into_content(url).and_then(|content| self.parse_resource(url, content)) {
                Ok(mut resource) => {
                    if resource.id.is_empty() {
                        resource.id = meta.resource_id.clone();
                    }
                    meta.resource = Some(resource);
                }
                Err(e) => tracing::warn!("Resource detail lookup for {} failed: {}", meta.resource_id, e),
            }
        }

        skipped
    }

    fn parse_resource(&self, url: &str, content: serde_json::Value) -> Result<AzureResource> {
        let mut resource: AzureResource =
            serde_json::from_value(content).map_err(|e| CollectError::PerItem {
                url: url.to_string(),
                status: 200,
                message: format!("malformed resource: {}", e),
            })?;
        resource.id = self.endpoints.subscription_relative(&resource.id);
        resource.subscription = self.endpoints.subscription_id().to_string();
        Ok(resource)
    }

    /// Query metric values for every resource and turn them into samples
    pub async fn fetch_metric_values(&self, metas: &[ResourceMeta]) -> Vec<Sample> {
        let urls: Vec<String> = metas.iter().map(|m| m.metric_url.clone()).collect();
        let results = BatchRequestEngine::new(self.client, &self.endpoints)
            .execute(&urls, &self.deadline)
            .await;

        let completed = results.items.len();
        let mut extractor = MetricExtractor::new();
        let mut samples = Vec::new();

        for (meta, item) in metas.iter().zip(results.items) {
            match item.into_content(&meta.metric_url) {
                Ok(content) => {
                    let values = extractor.extract(meta, content);
                    if !values.is_empty() {
                        samples.extend(extractor.info_sample(meta));
                        samples.extend(values);
                    }
                }
                Err(e) => tracing::warn!("Metrics for {} omitted: {}", meta.resource_id, e),
            }
        }

        if let Some(e) = results.failure {
            tracing::error!(
                "{} failed, metrics for {} of {} resources omitted: {}",
                Stage::FetchMetricValues.as_str(),
                metas.len() - completed,
                metas.len(),
                e
            );
        }

        samples
    }
}
