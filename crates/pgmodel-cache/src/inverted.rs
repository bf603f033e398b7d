//! Label key-pair -> (id, pos) cache
//!
//! Used when creating series to avoid a database round trip for every
//! label that has already been resolved.

use crate::labels::{LABEL_INFO_SIZE, LabelInfo, LabelKey};
use pgmodel_clockcache::{CacheStatsSnapshot, ClockCache};
use pgmodel_common::Result;
use pgmodel_metrics::MetricsRegistry;

/// Per-entry bookkeeping charged on top of the key and value bytes
pub const ENTRY_OVERHEAD: u64 = 17;

/// Cache name used for metric labels
pub const CACHE_NAME: &str = "inverted_labels";

/// Item kind used for metric labels
pub const ITEM_KIND: &str = "metric";

/// Weight charged for one cached label
pub fn entry_weight(key: &LabelKey) -> u64 {
    key.len() + LABEL_INFO_SIZE + ENTRY_OVERHEAD
}

/// Thread-safe inverted labels cache
pub struct InvertedLabelsCache {
    cache: ClockCache<LabelKey, LabelInfo>,
}

impl InvertedLabelsCache {
    /// Create a cache of `size` bytes reporting to `registry`. Fails when
    /// `size` is zero or the inverted labels cache is already registered.
    pub fn new(size: u64, registry: &MetricsRegistry) -> Result<Self> {
        let cache = ClockCache::with_metrics(CACHE_NAME, ITEM_KIND, size, registry)?;
        Ok(Self { cache })
    }

    /// Create a cache of `size` bytes whose metrics are not exported
    pub fn unregistered(size: u64) -> Result<Self> {
        Ok(Self {
            cache: ClockCache::new(size)?,
        })
    }

    /// Look up the resolved identity of a label
    pub fn get_labels_id(&self, key: &LabelKey) -> Option<LabelInfo> {
        self.cache.get(key)
    }

    /// Cache the resolved identity of a label. Returns false when the entry
    /// is too large to ever fit.
    pub fn put(&self, key: LabelKey, val: LabelInfo) -> bool {
        let weight = entry_weight(&key);
        self.cache.insert(key, val, weight).is_added()
    }

    /// [`get_labels_id`](Self::get_labels_id) from the three label fields
    pub fn lookup(&self, metric_name: &str, name: &str, value: &str) -> Option<LabelInfo> {
        self.get_labels_id(&LabelKey::new(metric_name, name, value))
    }

    /// [`put`](Self::put) from the three label fields and the resolved identity
    pub fn insert(
        &self,
        metric_name: &str,
        name: &str,
        value: &str,
        label_id: i32,
        pos: i32,
    ) -> bool {
        self.put(
            LabelKey::new(metric_name, name, value),
            LabelInfo::new(label_id, pos),
        )
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.cache.capacity()
    }

    pub fn occupied_bytes(&self) -> u64 {
        self.cache.occupied()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    fn http_get() -> LabelKey {
        LabelKey::new("http_requests_total", "method", "GET")
    }

    /// A key of exactly `weight` bytes once overhead is added
    fn key_of_weight(weight: u64, tag: char) -> LabelKey {
        let text = weight - LABEL_INFO_SIZE - ENTRY_OVERHEAD - 2;
        LabelKey::new(tag.to_string(), "n", "v".repeat(text as usize))
    }

    #[test]
    fn test_zero_size_rejected() {
        let registry = MetricsRegistry::new();
        let err = InvertedLabelsCache::new(0, &registry).err().unwrap();
        assert!(err.is_configuration());
        assert!(registry.is_empty());
        let err = InvertedLabelsCache::unregistered(0).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_entry_weight() {
        // 19 + 6 + 3 bytes of text, 8 for the id/pos pair, 17 overhead
        assert_eq!(entry_weight(&http_get()), 53);
        assert_eq!(entry_weight(&key_of_weight(60, 'b')), 60);
    }

    #[test]
    fn test_put_and_lookup() {
        let registry = MetricsRegistry::new();
        let cache = InvertedLabelsCache::new(100, &registry).unwrap();

        assert!(cache.insert("http_requests_total", "method", "GET", 7, 3));
        assert_eq!(
            cache.lookup("http_requests_total", "method", "GET"),
            Some(LabelInfo::new(7, 3))
        );
        assert_eq!(cache.get_labels_id(&http_get()), Some(LabelInfo::new(7, 3)));
        assert_eq!(cache.lookup("http_requests_total", "method", "POST"), None);
        assert_eq!(cache.occupied_bytes(), 53);
    }

    #[test]
    fn test_second_entry_evicts_first() {
        let cache = InvertedLabelsCache::unregistered(100).unwrap();
        assert!(cache.put(http_get(), LabelInfo::new(7, 3)));

        // 53 + 60 > 100: the only other entry has to go
        assert!(cache.put(key_of_weight(60, 'b'), LabelInfo::new(8, 0)));
        assert_eq!(cache.get_labels_id(&http_get()), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.occupied_bytes(), 60);
    }

    #[test]
    fn test_second_entry_evicts_first_even_when_accessed() {
        let cache = InvertedLabelsCache::unregistered(100).unwrap();
        assert!(cache.put(http_get(), LabelInfo::new(7, 3)));
        assert_eq!(cache.get_labels_id(&http_get()), Some(LabelInfo::new(7, 3)));

        // With a single resident entry the second chance only costs one
        // extra sweep; the entry is still the victim.
        assert!(cache.put(key_of_weight(60, 'b'), LabelInfo::new(8, 0)));
        assert_eq!(cache.get_labels_id(&http_get()), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_oversized_put_rejected() {
        let cache = InvertedLabelsCache::unregistered(100).unwrap();
        assert!(cache.put(http_get(), LabelInfo::new(7, 3)));

        let huge = LabelKey::new("m", "n", "v".repeat(100));
        assert!(!cache.put(huge.clone(), LabelInfo::new(1, 1)));
        assert_eq!(cache.get_labels_id(&huge), None);
        assert_eq!(cache.get_labels_id(&http_get()), Some(LabelInfo::new(7, 3)));
        assert_eq!(cache.occupied_bytes(), 53);
    }

    #[test]
    fn test_reinsert_replaces() {
        let cache = InvertedLabelsCache::unregistered(1_000).unwrap();
        assert!(cache.put(http_get(), LabelInfo::new(7, 3)));
        assert!(cache.put(http_get(), LabelInfo::new(7, 3)));
        assert!(cache.put(http_get(), LabelInfo::new(9, 4)));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.occupied_bytes(), 53);
        assert_eq!(cache.get_labels_id(&http_get()), Some(LabelInfo::new(9, 4)));
    }

    #[test]
    fn test_metrics_registered() {
        let registry = MetricsRegistry::new();
        let cache = InvertedLabelsCache::new(1_000, &registry).unwrap();
        cache.put(http_get(), LabelInfo::new(7, 3));
        cache.get_labels_id(&http_get());

        let output = registry.export_prometheus();
        assert!(output.contains(
            "promscale_cache_hits_total{name=\"inverted_labels\",type=\"metric\"} 1"
        ));
        assert!(output.contains(
            "promscale_cache_occupied_bytes{name=\"inverted_labels\",type=\"metric\"} 53"
        ));
    }

    #[test]
    fn test_second_cache_on_registry_rejected() {
        let registry = MetricsRegistry::new();
        let cache = InvertedLabelsCache::new(1_000, &registry).unwrap();
        let err = InvertedLabelsCache::new(50_000, &registry).err().unwrap();
        assert!(err.is_configuration());

        cache.put(LabelKey::new("up", "job", "node"), LabelInfo::new(1, 1));
        let stats = cache.stats();
        assert_eq!(stats.occupied_bytes, cache.occupied_bytes());
        assert_eq!(stats.elements, 1);
        assert_eq!(stats.capacity_bytes, 1_000);
    }

    #[test]
    fn test_concurrent_ingestion() {
        let registry = MetricsRegistry::new();
        let cache = Arc::new(InvertedLabelsCache::new(8 * 1024, &registry).unwrap());

        std::thread::scope(|s| {
            for worker in 0..8u64 {
                let cache = Arc::clone(&cache);
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(worker);
                    for _ in 0..5_000 {
                        let id = rng.gen_range(0..1_000i32);
                        let key = LabelKey::new(
                            format!("metric_{}", id % 20),
                            "instance",
                            format!("host-{id}"),
                        );
                        match cache.get_labels_id(&key) {
                            // id and pos are always stored together
                            Some(info) => assert_eq!(info, LabelInfo::new(id, id % 7)),
                            None => {
                                cache.put(key, LabelInfo::new(id, id % 7));
                            }
                        }
                    }
                });
            }
        });

        assert!(cache.occupied_bytes() <= cache.capacity_bytes());
        let stats = cache.stats();
        assert_eq!(stats.occupied_bytes, cache.occupied_bytes());
        assert_eq!(stats.elements, cache.len() as u64);
        assert_eq!(stats.hits + stats.misses, 8 * 5_000);
        assert!(stats.evictions > 0);
    }
}
