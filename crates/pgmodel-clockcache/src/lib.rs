//! pgmodel Clock Cache - bounded concurrent eviction engine
//!
//! A generic, thread-safe cache keyed by any `Hash + Eq` key. Capacity is
//! accounted in caller-supplied entry weights (bytes) rather than entry
//! counts, and entries are evicted with the CLOCK (second-chance) policy.
//! Each instance reports hits, misses, insertions and evictions to the
//! metrics registry under its own cache name and item kind.

pub mod cache;
pub mod stats;

pub use cache::{Admission, ClockCache};
pub use stats::{CacheMetrics, CacheStatsSnapshot};
