//! Explicit metrics registry
//!
//! A [`MetricsRegistry`] is built once at process startup and handed by
//! reference to every component that reports metrics. Components register
//! their gauges and counters through it and keep the returned handles;
//! recording a value is a single atomic operation on the handle.

use parking_lot::RwLock;
use pgmodel_common::{Error, Result};
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Namespace shared by every metric this workspace exports
pub const PROM_NAMESPACE: &str = "promscale";

/// Descriptor of a single metric: fully-qualified name, help text and
/// constant labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    pub namespace: String,
    pub subsystem: String,
    pub name: String,
    pub help: String,
    pub const_labels: BTreeMap<String, String>,
}

impl Opts {
    /// Create a descriptor with no namespace, subsystem or labels
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            subsystem: String::new(),
            name: name.into(),
            help: help.into(),
            const_labels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = subsystem.into();
        self
    }

    #[must_use]
    pub fn const_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.const_labels.insert(key.into(), value.into());
        self
    }

    /// `namespace_subsystem_name`, skipping empty parts
    pub fn fq_name(&self) -> String {
        [&self.namespace, &self.subsystem, &self.name]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// The two metric kinds this workspace exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// An f64 stored as bits in an `AtomicU64`
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, delta: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }
}

/// A value that can go up and down
#[derive(Debug)]
pub struct Gauge {
    opts: Opts,
    value: AtomicF64,
}

impl Gauge {
    /// Create an unregistered gauge starting at zero
    pub fn new(opts: Opts) -> Self {
        Self {
            opts,
            value: AtomicF64::default(),
        }
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn set(&self, value: f64) {
        self.value.store(value);
    }

    pub fn add(&self, delta: f64) {
        self.value.add(delta);
    }

    pub fn inc(&self) {
        self.add(1.0);
    }

    pub fn dec(&self) {
        self.add(-1.0);
    }

    pub fn get(&self) -> f64 {
        self.value.load()
    }
}

/// A monotonically increasing value
#[derive(Debug)]
pub struct Counter {
    opts: Opts,
    value: AtomicF64,
}

impl Counter {
    /// Create an unregistered counter starting at zero
    pub fn new(opts: Opts) -> Self {
        Self {
            opts,
            value: AtomicF64::default(),
        }
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn inc(&self) {
        self.value.add(1.0);
    }

    /// Add `delta`; negative or NaN deltas would break monotonicity and are dropped
    pub fn inc_by(&self, delta: f64) {
        if delta.is_nan() || delta < 0.0 {
            warn!(
                metric = %self.opts.fq_name(),
                delta,
                "ignoring counter decrease"
            );
            return;
        }
        self.value.add(delta);
    }

    pub fn get(&self) -> f64 {
        self.value.load()
    }
}

/// A registered metric: closed over the kinds this workspace exports
#[derive(Debug, Clone)]
pub enum Metric {
    Gauge(Arc<Gauge>),
    Counter(Arc<Counter>),
}

impl Metric {
    pub fn gauge(opts: Opts) -> Self {
        Metric::Gauge(Arc::new(Gauge::new(opts)))
    }

    pub fn counter(opts: Opts) -> Self {
        Metric::Counter(Arc::new(Counter::new(opts)))
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::Gauge(_) => MetricKind::Gauge,
            Metric::Counter(_) => MetricKind::Counter,
        }
    }

    pub fn opts(&self) -> &Opts {
        match self {
            Metric::Gauge(g) => g.opts(),
            Metric::Counter(c) => c.opts(),
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            Metric::Gauge(g) => g.get(),
            Metric::Counter(c) => c.get(),
        }
    }

    /// Apply a sampled value: gauges take it as the new level, counters
    /// take it as an increment.
    pub fn record(&self, value: f64) {
        match self {
            Metric::Gauge(g) => g.set(value),
            Metric::Counter(c) => c.inc_by(value),
        }
    }
}

/// Registry key: one series per fully-qualified name and label set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesId {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesId {
    fn of(opts: &Opts) -> Self {
        Self {
            name: opts.fq_name(),
            labels: opts
                .const_labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Process-wide set of metrics, created once at startup
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    series: RwLock<BTreeMap<SeriesId, Metric>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric and return the canonical handle.
    ///
    /// Registering a series that already exists with the same kind returns
    /// the existing handle, so several components may share a series. A
    /// family name can only carry one kind.
    pub fn register(&self, metric: Metric) -> Result<Metric> {
        self.insert_series(metric, false)
    }

    /// Register a metric that no other component may share: fails with a
    /// configuration error when the series already exists.
    pub fn register_new(&self, metric: Metric) -> Result<Metric> {
        self.insert_series(metric, true)
    }

    fn insert_series(&self, metric: Metric, exclusive: bool) -> Result<Metric> {
        let id = SeriesId::of(metric.opts());
        let mut series = self.series.write();

        if let Some(existing) = series.get(&id) {
            if existing.kind() != metric.kind() {
                return Err(Error::MetricKindMismatch {
                    name: id.name,
                    registered: existing.kind().as_str(),
                });
            }
            if exclusive {
                return Err(Error::configuration(format!(
                    "metric series {}{:?} is already registered",
                    id.name, id.labels
                )));
            }
            return Ok(existing.clone());
        }

        let family_start = SeriesId {
            name: id.name.clone(),
            labels: Vec::new(),
        };
        let conflict = series
            .range(family_start..)
            .take_while(|(other_id, _)| other_id.name == id.name)
            .map(|(_, other)| other.kind())
            .find(|kind| *kind != metric.kind());
        if let Some(kind) = conflict {
            return Err(Error::MetricKindMismatch {
                name: id.name,
                registered: kind.as_str(),
            });
        }

        series.insert(id, metric.clone());
        Ok(metric)
    }

    pub fn gauge(&self, opts: Opts) -> Result<Arc<Gauge>> {
        match self.register(Metric::gauge(opts))? {
            Metric::Gauge(g) => Ok(g),
            Metric::Counter(c) => Err(Error::MetricKindMismatch {
                name: c.opts().fq_name(),
                registered: MetricKind::Counter.as_str(),
            }),
        }
    }

    pub fn counter(&self, opts: Opts) -> Result<Arc<Counter>> {
        match self.register(Metric::counter(opts))? {
            Metric::Counter(c) => Ok(c),
            Metric::Gauge(g) => Err(Error::MetricKindMismatch {
                name: g.opts().fq_name(),
                registered: MetricKind::Gauge.as_str(),
            }),
        }
    }

    /// Number of registered series
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }

    /// Snapshot of every registered series, ordered by name then labels
    pub fn gather(&self) -> Vec<Metric> {
        self.series.read().values().cloned().collect()
    }

    /// Write every series in the Prometheus text exposition format
    pub fn encode<W: Write>(&self, out: &mut W) -> fmt::Result {
        let series = self.series.read();
        let mut current_family: Option<&str> = None;

        for (id, metric) in series.iter() {
            if current_family != Some(id.name.as_str()) {
                writeln!(out, "# HELP {} {}", id.name, escape_help(&metric.opts().help))?;
                writeln!(out, "# TYPE {} {}", id.name, metric.kind().as_str())?;
                current_family = Some(id.name.as_str());
            }

            out.write_str(&id.name)?;
            if !id.labels.is_empty() {
                out.write_char('{')?;
                for (i, (key, value)) in id.labels.iter().enumerate() {
                    if i > 0 {
                        out.write_char(',')?;
                    }
                    write!(out, "{}=\"{}\"", key, escape_label_value(value))?;
                }
                out.write_char('}')?;
            }
            writeln!(out, " {}", format_value(metric.value()))?;
        }
        Ok(())
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(4 * 1024);
        // Writing into a String cannot fail.
        let _ = self.encode(&mut output);
        output
    }
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        value.to_string()
    }
}
