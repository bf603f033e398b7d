//! CLOCK (second-chance) cache bounded by total entry weight
//!
//! Entries live in a slot table scanned by a circular hand. Each slot
//! carries a recency bit that is set on insert and on every hit. When an
//! insert needs room, the hand walks the table: a slot with the bit set
//! loses the bit and is skipped, the first slot found without it is
//! evicted. The hand keeps its position between inserts.
//!
//! Eviction policy details:
//! - the hand visits slots in table order and wraps around;
//! - a freed slot is reused by the next new entry, most recently freed first;
//! - eviction stops as soon as the incoming entry fits;
//! - an entry heavier than the whole capacity is rejected up front.

use crate::stats::{CacheMetrics, CacheStatsSnapshot};
use parking_lot::RwLock;
use pgmodel_common::{Error, Result};
use pgmodel_metrics::MetricsRegistry;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Result of [`ClockCache::insert`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<V> {
    /// A new entry was stored
    Inserted,
    /// The key was present; its previous value was replaced
    Replaced(V),
    /// The entry is heavier than the cache capacity and was not stored
    Rejected,
}

impl<V> Admission<V> {
    /// Whether the entry is now in the cache
    pub fn is_added(&self) -> bool {
        !matches!(self, Admission::Rejected)
    }

    /// The value the entry replaced, if any
    pub fn previous(self) -> Option<V> {
        match self {
            Admission::Replaced(v) => Some(v),
            Admission::Inserted | Admission::Rejected => None,
        }
    }
}

/// One occupied slot
struct Slot<K, V> {
    key: K,
    value: V,
    weight: u64,
    /// Recency bit, set by hits under the shared lock
    used: AtomicBool,
}

/// Everything guarded by the cache lock
struct ClockState<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    hand: usize,
    occupied: u64,
}

impl<K: Hash + Eq + Clone, V> ClockState<K, V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            hand: 0,
            occupied: 0,
        }
    }

    fn slot_mut(&mut self, i: usize) -> &mut Slot<K, V> {
        match self.slots[i].as_mut() {
            Some(slot) => slot,
            None => unreachable!("clock cache index points at empty slot {i}"),
        }
    }

    /// Advance the hand until one entry is evicted. `protect` is never
    /// chosen as the victim.
    fn evict_one(&mut self, protect: Option<usize>) -> Option<Slot<K, V>> {
        let n = self.slots.len();
        // One pass clears every recency bit, the next one finds a victim.
        for _ in 0..2 * n {
            let i = self.hand;
            self.hand = (self.hand + 1) % n;

            if protect == Some(i) {
                continue;
            }
            let Some(slot) = self.slots[i].as_mut() else {
                continue;
            };
            let used = slot.used.get_mut();
            if *used {
                *used = false;
                continue;
            }

            let victim = self.slots[i].take()?;
            self.index.remove(&victim.key);
            self.occupied -= victim.weight;
            self.free.push(i);
            return Some(victim);
        }
        None
    }

    /// Evict until `incoming` more weight fits in `capacity`. Returns the
    /// number of evicted entries.
    fn make_room(&mut self, incoming: u64, capacity: u64, protect: Option<usize>) -> u64 {
        let mut evicted = 0;
        while self.occupied + incoming > capacity {
            if self.evict_one(protect).is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    fn store(&mut self, key: K, value: V, weight: u64) {
        let i = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.slots[i] = Some(Slot {
            key: key.clone(),
            value,
            weight,
            used: AtomicBool::new(true),
        });
        self.index.insert(key, i);
        self.occupied += weight;
    }
}

/// Thread-safe, weight-bounded cache with CLOCK eviction
pub struct ClockCache<K, V> {
    state: RwLock<ClockState<K, V>>,
    capacity: u64,
    metrics: CacheMetrics,
}

impl<K, V> ClockCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` total weight, with metrics
    /// that are not exported
    pub fn new(capacity: u64) -> Result<Self> {
        Self::with_cache_metrics(capacity, CacheMetrics::detached("", ""))
    }

    /// Create a cache whose metrics are registered under `name` and the item
    /// kind label `kind`
    pub fn with_metrics(
        name: &str,
        kind: &str,
        capacity: u64,
        registry: &MetricsRegistry,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::configuration(format!(
                "{name} cache capacity must be > 0"
            )));
        }
        let metrics = CacheMetrics::register(registry, name, kind)?;
        debug!(cache = name, kind, capacity, "created clock cache");
        Self::with_cache_metrics(capacity, metrics)
    }

    fn with_cache_metrics(capacity: u64, metrics: CacheMetrics) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::configuration("cache capacity must be > 0"));
        }
        metrics.capacity.set(capacity as f64);
        Ok(Self {
            state: RwLock::new(ClockState::new()),
            capacity,
            metrics,
        })
    }

    /// Look up a value, marking the entry as recently used
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let state = self.state.read();
        let found = state
            .index
            .get(key)
            .and_then(|&i| state.slots[i].as_ref())
            .map(|slot| {
                slot.used.store(true, Ordering::Relaxed);
                slot.value.clone()
            });
        drop(state);

        if found.is_some() {
            self.metrics.hits.inc();
        } else {
            self.metrics.misses.inc();
        }
        found
    }

    /// Store `value` under `key` with the given weight, evicting other
    /// entries as needed
    pub fn insert(&self, key: K, value: V, weight: u64) -> Admission<V> {
        if weight > self.capacity {
            trace!(weight, capacity = self.capacity, "rejecting oversized entry");
            return Admission::Rejected;
        }

        let mut state = self.state.write();
        let (admission, evicted) = if let Some(&i) = state.index.get(&key) {
            let slot = state.slot_mut(i);
            let previous = std::mem::replace(&mut slot.value, value);
            let old_weight = std::mem::replace(&mut slot.weight, weight);
            *slot.used.get_mut() = true;
            state.occupied = state.occupied - old_weight + weight;
            let evicted = state.make_room(0, self.capacity, Some(i));
            (Admission::Replaced(previous), evicted)
        } else {
            let evicted = state.make_room(weight, self.capacity, None);
            state.store(key, value, weight);
            (Admission::Inserted, evicted)
        };

        self.metrics.insertions.inc();
        if evicted > 0 {
            self.metrics.evictions.inc_by(evicted as f64);
        }
        self.metrics.elements.set(state.index.len() as f64);
        self.metrics.occupied.set(state.occupied as f64);
        admission
    }

    /// Check for a key without touching its recency bit
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.state.read().index.contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.state.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().index.is_empty()
    }

    /// Maximum total weight
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Total weight of the entries currently stored
    pub fn occupied(&self) -> u64 {
        self.state.read().occupied
    }

    /// Get cache statistics. Sizes are read from this instance's own state.
    pub fn stats(&self) -> CacheStatsSnapshot {
        let state = self.state.read();
        CacheStatsSnapshot {
            elements: state.index.len() as u64,
            occupied_bytes: state.occupied,
            capacity_bytes: self.capacity,
            ..self.metrics.snapshot()
        }
    }
}
