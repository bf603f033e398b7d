//! In-memory stand-in for the label tables
//!
//! Hands out label IDs the way the database does: one ID per distinct
//! label, and one column position per label name within a metric.

use async_trait::async_trait;
use parking_lot::Mutex;
use pgmodel_cache::{LabelInfo, LabelKey};
use pgmodel_common::{Error, Result};
use pgmodel_metrics::QueryExecutor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Tables {
    /// (metric, label name, label value) -> label id
    labels: HashMap<LabelKey, i32>,
    /// metric -> label name -> column position
    positions: HashMap<String, HashMap<String, i32>>,
    next_id: i32,
}

/// Simulated database resolving label identities
#[derive(Default)]
pub struct SimulatedDatabase {
    tables: Mutex<Tables>,
    round_trips: AtomicU64,
}

impl SimulatedDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a label, creating its ID and position on first sight
    pub fn resolve(&self, key: &LabelKey) -> LabelInfo {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.tables.lock();
        let tables = &mut *guard;

        let pos = {
            let columns = tables.positions.entry(key.metric_name.clone()).or_default();
            let next_pos = columns.len() as i32 + 1;
            *columns.entry(key.name.clone()).or_insert(next_pos)
        };

        let label_id = match tables.labels.get(key) {
            Some(&id) => id,
            None => {
                tables.next_id += 1;
                let id = tables.next_id;
                tables.labels.insert(key.clone(), id);
                id
            }
        };

        LabelInfo::new(label_id, pos)
    }

    /// Number of `resolve` calls so far
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    pub fn label_count(&self) -> usize {
        self.tables.lock().labels.len()
    }

    fn metric_count(&self) -> usize {
        self.tables.lock().positions.len()
    }
}

#[async_trait]
impl QueryExecutor for SimulatedDatabase {
    async fn query_row(&self, query: &str) -> Result<Vec<f64>> {
        match query {
            pgmodel_metrics::database::HEALTH_CHECK_QUERY => Ok(vec![1.0]),
            pgmodel_metrics::database::METRIC_COUNT_QUERY => Ok(vec![self.metric_count() as f64]),
            _ => Err(Error::probe(
                "catalog tables are not available in the simulated database",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_stable() {
        let db = SimulatedDatabase::new();
        let key = LabelKey::new("up", "job", "node");

        let first = db.resolve(&key);
        let second = db.resolve(&key);
        assert_eq!(first, second);
        assert_eq!(db.round_trips(), 2);
        assert_eq!(db.label_count(), 1);
    }

    #[test]
    fn test_positions_per_metric() {
        let db = SimulatedDatabase::new();
        let job = db.resolve(&LabelKey::new("up", "job", "node"));
        let instance = db.resolve(&LabelKey::new("up", "instance", "a"));
        let job_again = db.resolve(&LabelKey::new("up", "job", "api"));
        let other_metric = db.resolve(&LabelKey::new("errors_total", "instance", "a"));

        assert_eq!(job.pos, 1);
        assert_eq!(instance.pos, 2);
        assert_eq!(job_again.pos, 1);
        assert_ne!(job_again.label_id, job.label_id);
        assert_eq!(other_metric.pos, 1);
    }

    #[tokio::test]
    async fn test_answers_health_check() {
        let db = SimulatedDatabase::new();
        db.resolve(&LabelKey::new("up", "job", "node"));
        assert_eq!(db.query_row("SELECT 1").await.unwrap(), vec![1.0]);
        assert_eq!(
            db.query_row(pgmodel_metrics::database::METRIC_COUNT_QUERY)
                .await
                .unwrap(),
            vec![1.0]
        );
        assert!(db.query_row("select 2").await.is_err());
    }
}
