//! Synthetic label ingestion
//!
//! Each worker draws (metric, label name, label value) triples with a skew
//! towards low value indices, so a small hot set is seen far more often
//! than the long tail. Misses are resolved against the simulated database
//! and written back to the cache.

use crate::database::SimulatedDatabase;
use pgmodel_cache::{InvertedLabelsCache, LabelKey};
use pgmodel_common::IngestConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::AddAssign;
use tracing::debug;

const LABEL_NAMES: &[&str] = &["instance", "job", "method", "status", "path"];

/// Counters gathered by one or more workers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub inserted: u64,
    pub rejected: u64,
}

impl AddAssign for WorkerReport {
    fn add_assign(&mut self, other: Self) {
        self.lookups += other.lookups;
        self.hits += other.hits;
        self.misses += other.misses;
        self.inserted += other.inserted;
        self.rejected += other.rejected;
    }
}

/// Skewed index in `0..n`: squaring a uniform sample favours small values
fn skewed_index(rng: &mut StdRng, n: usize) -> usize {
    let r: f64 = rng.r#gen();
    ((r * r * n as f64) as usize).min(n - 1)
}

fn next_key(rng: &mut StdRng, workload: &IngestConfig) -> LabelKey {
    let metric = rng.gen_range(0..workload.metrics);
    let name = LABEL_NAMES[rng.gen_range(0..LABEL_NAMES.len())];
    let value = skewed_index(rng, workload.label_values);
    LabelKey::new(format!("metric_{metric}"), name, format!("{name}-{value}"))
}

/// Run one ingestion worker to completion
pub fn run_worker(
    worker: usize,
    workload: &IngestConfig,
    cache: &InvertedLabelsCache,
    db: &SimulatedDatabase,
) -> WorkerReport {
    let mut rng = StdRng::seed_from_u64(worker as u64);
    let mut report = WorkerReport::default();

    for _ in 0..workload.ops_per_worker {
        let key = next_key(&mut rng, workload);
        report.lookups += 1;

        if cache.get_labels_id(&key).is_some() {
            report.hits += 1;
            continue;
        }

        report.misses += 1;
        let info = db.resolve(&key);
        if cache.put(key, info) {
            report.inserted += 1;
        } else {
            report.rejected += 1;
        }
    }

    debug!(
        worker,
        lookups = report.lookups,
        hits = report.hits,
        misses = report.misses,
        "worker finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(ops: usize) -> IngestConfig {
        IngestConfig {
            workers: 1,
            ops_per_worker: ops,
            metrics: 5,
            label_values: 20,
        }
    }

    #[test]
    fn test_large_cache_misses_once_per_label() {
        let cache = InvertedLabelsCache::unregistered(1 << 20).unwrap();
        let db = SimulatedDatabase::new();
        let report = run_worker(0, &workload(5_000), &cache, &db);

        assert_eq!(report.lookups, 5_000);
        assert_eq!(report.hits + report.misses, report.lookups);
        assert_eq!(report.rejected, 0);
        // Nothing is evicted, so every distinct label misses exactly once
        assert_eq!(report.misses, db.label_count() as u64);
        assert_eq!(db.round_trips(), report.misses);
        assert_eq!(cache.len(), db.label_count());
    }

    #[test]
    fn test_small_cache_evicts() {
        let cache = InvertedLabelsCache::unregistered(512).unwrap();
        let db = SimulatedDatabase::new();
        let report = run_worker(0, &workload(5_000), &cache, &db);

        assert!(report.misses > db.label_count() as u64);
        assert!(cache.occupied_bytes() <= cache.capacity_bytes());
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn test_cached_identity_matches_database() {
        let cache = InvertedLabelsCache::unregistered(1 << 20).unwrap();
        let db = SimulatedDatabase::new();
        run_worker(3, &workload(1_000), &cache, &db);

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let key = next_key(&mut rng, &workload(0));
            let cached = cache.get_labels_id(&key).unwrap();
            assert_eq!(cached, db.resolve(&key));
        }
    }

    #[test]
    fn test_reports_add_up() {
        let mut total = WorkerReport::default();
        total += WorkerReport {
            lookups: 3,
            hits: 1,
            misses: 2,
            inserted: 2,
            rejected: 0,
        };
        total += WorkerReport {
            lookups: 1,
            hits: 0,
            misses: 1,
            inserted: 0,
            rejected: 1,
        };
        assert_eq!(total.lookups, 4);
        assert_eq!(total.misses, 3);
        assert_eq!(total.rejected, 1);
    }
}
