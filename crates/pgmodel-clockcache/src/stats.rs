//! Per-instance cache metrics
//!
//! Every cache instance reports under the same metric families, told apart
//! by the `name` and `type` labels.

use pgmodel_common::Result;
use pgmodel_metrics::{Counter, Gauge, Metric, MetricsRegistry, Opts, PROM_NAMESPACE};
use std::sync::Arc;

const SUBSYSTEM: &str = "cache";

/// Metric handles of one cache instance
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    pub(crate) hits: Arc<Counter>,
    pub(crate) misses: Arc<Counter>,
    pub(crate) insertions: Arc<Counter>,
    pub(crate) evictions: Arc<Counter>,
    pub(crate) elements: Arc<Gauge>,
    pub(crate) occupied: Arc<Gauge>,
    pub(crate) capacity: Arc<Gauge>,
}

fn opts(metric: &str, help: &str, name: &str, kind: &str) -> Opts {
    Opts::new(metric, help)
        .namespace(PROM_NAMESPACE)
        .subsystem(SUBSYSTEM)
        .const_label("name", name)
        .const_label("type", kind)
}

impl CacheMetrics {
    /// Metrics that are tracked but not exported anywhere
    pub fn detached(name: &str, kind: &str) -> Self {
        Self {
            hits: Arc::new(Counter::new(opts("hits_total", "", name, kind))),
            misses: Arc::new(Counter::new(opts("misses_total", "", name, kind))),
            insertions: Arc::new(Counter::new(opts("insertions_total", "", name, kind))),
            evictions: Arc::new(Counter::new(opts("evictions_total", "", name, kind))),
            elements: Arc::new(Gauge::new(opts("elements", "", name, kind))),
            occupied: Arc::new(Gauge::new(opts("occupied_bytes", "", name, kind))),
            capacity: Arc::new(Gauge::new(opts("capacity_bytes", "", name, kind))),
        }
    }

    /// Metrics registered with `registry` under `name` / `kind`.
    ///
    /// Each `(name, kind)` pair belongs to one cache instance; registering
    /// it a second time is a configuration error.
    pub fn register(registry: &MetricsRegistry, name: &str, kind: &str) -> Result<Self> {
        let hits = Arc::new(Counter::new(opts(
            "hits_total",
            "Total number of cache lookups that found an entry.",
            name,
            kind,
        )));
        registry.register_new(Metric::Counter(Arc::clone(&hits)))?;

        Ok(Self {
            hits,
            misses: registry.counter(opts(
                "misses_total",
                "Total number of cache lookups that found no entry.",
                name,
                kind,
            ))?,
            insertions: registry.counter(opts(
                "insertions_total",
                "Total number of entries admitted into the cache.",
                name,
                kind,
            ))?,
            evictions: registry.counter(opts(
                "evictions_total",
                "Total number of entries evicted to make room.",
                name,
                kind,
            ))?,
            elements: registry.gauge(opts(
                "elements",
                "Number of entries currently in the cache.",
                name,
                kind,
            ))?,
            occupied: registry.gauge(opts(
                "occupied_bytes",
                "Sum of the weights of the entries currently in the cache.",
                name,
                kind,
            ))?,
            capacity: registry.gauge(opts(
                "capacity_bytes",
                "Maximum total weight the cache may hold.",
                name,
                kind,
            ))?,
        })
    }

    pub(crate) fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.get() as u64,
            misses: self.misses.get() as u64,
            insertions: self.insertions.get() as u64,
            evictions: self.evictions.get() as u64,
            elements: self.elements.get() as u64,
            occupied_bytes: self.occupied.get() as u64,
            capacity_bytes: self.capacity.get() as u64,
        }
    }
}

/// Point-in-time copy of a cache's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub elements: u64,
    pub occupied_bytes: u64,
    pub capacity_bytes: u64,
}

impl CacheStatsSnapshot {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStatsSnapshot {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStatsSnapshot::default().hit_ratio(), 0.0);
    }

    #[test]
    fn test_register_labels_series() {
        let registry = MetricsRegistry::new();
        CacheMetrics::register(&registry, "inverted_labels", "metric").unwrap();
        CacheMetrics::register(&registry, "series", "series").unwrap();
        assert_eq!(registry.len(), 14);

        let output = registry.export_prometheus();
        assert!(output.contains(
            "promscale_cache_hits_total{name=\"inverted_labels\",type=\"metric\"} 0"
        ));
        assert!(output.contains("# TYPE promscale_cache_capacity_bytes gauge"));
    }

    #[test]
    fn test_same_instance_name_rejected() {
        let registry = MetricsRegistry::new();
        CacheMetrics::register(&registry, "inverted_labels", "metric").unwrap();

        let err = CacheMetrics::register(&registry, "inverted_labels", "metric").unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(registry.len(), 7);

        // Same name with another item kind is another instance
        CacheMetrics::register(&registry, "inverted_labels", "series").unwrap();
        assert_eq!(registry.len(), 14);
    }

    #[test]
    fn test_detached_not_registered() {
        let metrics = CacheMetrics::detached("scratch", "metric");
        metrics.hits.inc();
        assert_eq!(metrics.snapshot().hits, 1);
    }
}
