use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    pub endpoint: Endpoint,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Endpoint {
    OrgTeams,
    TeamMembers,
    UserKeys,
    RateLimit,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: ItemKind,
}

/// Which kind of lookup a cache or failure metric refers to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum ItemKind {
    Team,
    User,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every metric recorded during one resolution run.
pub struct Metrics {
    // -- upstream API --
    pub upstream_api_calls: Family<EndpointLabels, Counter>,
    pub upstream_api_rate_limit_remaining: Gauge,

    // -- resolution cache --
    pub cache_hits: Family<KindLabels, Counter>,
    pub cache_misses: Family<KindLabels, Counter>,

    // -- results --
    pub failed_items: Family<KindLabels, Counter>,
    pub keys_emitted: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let upstream_api_calls = Family::<EndpointLabels, Counter>::default();
        registry.register(
            "ghkeys_upstream_api_calls",
            "GitHub API page requests by endpoint",
            upstream_api_calls.clone(),
        );

        let upstream_api_rate_limit_remaining: Gauge = Gauge::default();
        registry.register(
            "ghkeys_upstream_api_rate_limit_remaining",
            "Remaining GitHub API calls before rate limit",
            upstream_api_rate_limit_remaining.clone(),
        );

        let cache_hits = Family::<KindLabels, Counter>::default();
        registry.register(
            "ghkeys_cache_hits",
            "Resolution cache hits by lookup kind",
            cache_hits.clone(),
        );

        let cache_misses = Family::<KindLabels, Counter>::default();
        registry.register(
            "ghkeys_cache_misses",
            "Resolution cache misses by lookup kind",
            cache_misses.clone(),
        );

        let failed_items = Family::<KindLabels, Counter>::default();
        registry.register(
            "ghkeys_failed_items",
            "Teams or users that could not be resolved",
            failed_items.clone(),
        );

        let keys_emitted = Counter::default();
        registry.register(
            "ghkeys_keys_emitted",
            "Keys handed to the output across all accounts",
            keys_emitted.clone(),
        );

        Self {
            upstream_api_calls,
            upstream_api_rate_limit_remaining,
            cache_hits,
            cache_misses,
            failed_items,
            keys_emitted,
        }
    }

    pub fn api_call(&self, endpoint: Endpoint) {
        self.upstream_api_calls
            .get_or_create(&EndpointLabels { endpoint })
            .inc();
    }

    pub fn cache_lookup(&self, kind: ItemKind, hit: bool) {
        let family = if hit { &self.cache_hits } else { &self.cache_misses };
        family.get_or_create(&KindLabels { kind }).inc();
    }

    pub fn item_failed(&self, kind: ItemKind) {
        self.failed_items.get_or_create(&KindLabels { kind }).inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Cloneable handle to the run's registry and metrics.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all run metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String> {
        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, &self.registry)
            .context("failed to encode metrics")?;
        Ok(out)
    }

    /// Write the rendered registry to `path` for a node_exporter textfile
    /// collector.  The file is replaced atomically via a sibling temp file.
    pub async fn write_textfile(&self, path: &Path) -> Result<()> {
        let body = self.encode()?;
        let tmp = path.with_extension("prom.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write metrics file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed to move metrics file into place: {}", path.display()))?;
        Ok(())
    }
}
