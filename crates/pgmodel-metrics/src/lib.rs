//! pgmodel Metrics - explicit registry and database probes
//!
//! This crate provides:
//! - **MetricsRegistry**: the process-wide set of gauges and counters,
//!   created once at startup and passed by reference
//! - **Prometheus export**: text exposition of every registered series
//! - **DatabaseMetrics**: the fixed table of database health and capacity
//!   probes and the recording of their results

pub mod database;
pub mod registry;

pub use database::{DatabaseMetrics, ProbeReport, QueryExecutor};
pub use registry::{Counter, Gauge, Metric, MetricKind, MetricsRegistry, Opts, PROM_NAMESPACE};
