//! Database health and capacity probes
//!
//! A fixed table of read-only queries, each feeding one or more declared
//! metrics. Columns of a probe's result row map positionally onto its
//! metrics. The first probe is the health check: it drives the `up` gauge,
//! the network latency gauge and the health-check counters. Every other
//! probe that fails or returns a malformed row increments the probe error
//! counter and leaves its own metrics untouched.
//!
//! Running the queries is left to a [`QueryExecutor`]; scheduling the
//! updates is left to the caller.

use crate::registry::{Counter, Gauge, Metric, MetricKind, MetricsRegistry, Opts, PROM_NAMESPACE};
use async_trait::async_trait;
use pgmodel_common::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const SUBSYSTEM: &str = "sql_database";

/// Query of the health-check probe
pub const HEALTH_CHECK_QUERY: &str = "SELECT 1";

/// Query of the metric count probe
pub const METRIC_COUNT_QUERY: &str = "select count(*)::bigint from _prom_catalog.metric";

/// Executes a probe query and returns its single result row
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn query_row(&self, query: &str) -> Result<Vec<f64>>;
}

/// Static declaration of a probe metric
struct MetricSpec {
    kind: MetricKind,
    name: &'static str,
    help: &'static str,
}

const fn gauge(name: &'static str, help: &'static str) -> MetricSpec {
    MetricSpec {
        kind: MetricKind::Gauge,
        name,
        help,
    }
}

const fn counter(name: &'static str, help: &'static str) -> MetricSpec {
    MetricSpec {
        kind: MetricKind::Counter,
        name,
        help,
    }
}

/// Static declaration of a probe
struct ProbeSpec {
    /// Several metrics may be read by one query; they follow the order of
    /// the query's result columns.
    metrics: &'static [MetricSpec],
    query: &'static str,
    /// Only `metrics[0]` is used by the health check
    is_health_check: bool,
}

static PROBES: &[ProbeSpec] = &[
    ProbeSpec {
        metrics: &[counter(
            "health_check_total",
            "Total number of database health checks performed.",
        )],
        query: HEALTH_CHECK_QUERY,
        is_health_check: true,
    },
    ProbeSpec {
        metrics: &[
            gauge("chunks_count", "Total number of chunks in TimescaleDB currently."),
            gauge(
                "chunks_compressed_count",
                "Total number of compressed chunks in TimescaleDB currently.",
            ),
        ],
        query: "SELECT \
                count(*) FILTER (WHERE dropped=false AND compressed_chunk_id IS NULL)::BIGINT AS chunks_count, \
                count(*) FILTER (WHERE dropped=false AND compressed_chunk_id IS NOT NULL)::BIGINT AS chunks_compressed_count \
            FROM _timescaledb_catalog.chunk",
        is_health_check: false,
    },
    ProbeSpec {
        metrics: &[gauge(
            "chunks_metrics_expired_count",
            "The number of metrics chunks soon to be removed by maintenance jobs.",
        )],
        query: "WITH conf AS MATERIALIZED (SELECT _prom_catalog.get_default_retention_period() AS def_retention) \
            SELECT count(*)::BIGINT \
            FROM _timescaledb_catalog.dimension_slice ds \
                INNER JOIN _timescaledb_catalog.dimension d ON (d.id = ds.dimension_id) \
                INNER JOIN _timescaledb_catalog.hypertable h ON (h.id = d.hypertable_id) \
                INNER JOIN _prom_catalog.metric m ON (m.table_name = h.table_name AND m.table_schema = h.schema_name) \
                JOIN conf ON TRUE \
            WHERE ds.range_start < _timescaledb_internal.time_to_internal(now() - coalesce(m.retention_period, conf.def_retention)) \
              AND ds.range_end < _timescaledb_internal.time_to_internal(now() - coalesce(m.retention_period, conf.def_retention))",
        is_health_check: false,
    },
    ProbeSpec {
        metrics: &[
            gauge(
                "chunks_metrics_uncompressed_count",
                "The number of metrics chunks soon to be compressed by maintenance jobs.",
            ),
            gauge(
                "chunks_metrics_delayed_compression_count",
                "The number of metrics chunks not-compressed due to a set delay.",
            ),
        ],
        query: "WITH chunk_candidates AS MATERIALIZED ( \
                SELECT chcons.dimension_slice_id, h.table_name, h.schema_name \
                FROM _timescaledb_catalog.chunk_constraint chcons \
                    INNER JOIN _timescaledb_catalog.chunk c ON c.id = chcons.chunk_id \
                    INNER JOIN _timescaledb_catalog.hypertable h ON h.id = c.hypertable_id \
                WHERE c.dropped IS FALSE \
                AND h.compression_state = 1 \
                AND (c.status & 1) != 1 \
            ) \
            SELECT \
                count(*) FILTER(WHERE m.delay_compression_until IS NULL OR m.delay_compression_until < now())::BIGINT AS uncompressed, \
                count(*) FILTER(WHERE m.delay_compression_until IS NOT NULL AND m.delay_compression_until >= now())::BIGINT AS delayed_compression \
            FROM chunk_candidates cc \
                INNER JOIN _timescaledb_catalog.dimension_slice ds ON ds.id = cc.dimension_slice_id \
                INNER JOIN _prom_catalog.metric m ON (m.table_name = cc.table_name AND m.table_schema = cc.schema_name) \
            WHERE NOT m.is_view \
            AND ds.range_start <= _timescaledb_internal.time_to_internal(now() - interval '1 hour') \
            AND ds.range_end <= _timescaledb_internal.time_to_internal(now() - interval '1 hour')",
        is_health_check: false,
    },
    ProbeSpec {
        metrics: &[gauge(
            "chunks_traces_expired_count",
            "The number of traces chunks soon to be removed by maintenance jobs.",
        )],
        query: "WITH conf AS MATERIALIZED (SELECT coalesce(ps_trace.get_trace_retention_period(), interval '0 day') AS def_retention) \
            SELECT count(*)::BIGINT \
            FROM _timescaledb_catalog.dimension_slice ds \
                INNER JOIN _timescaledb_catalog.dimension d ON (d.id = ds.dimension_id) \
                INNER JOIN _timescaledb_catalog.hypertable h ON (h.id = d.hypertable_id) \
                JOIN conf ON TRUE \
            WHERE ds.range_start < _timescaledb_internal.time_to_internal(now() - conf.def_retention) \
              AND ds.range_end < _timescaledb_internal.time_to_internal(now() - conf.def_retention) \
              AND h.schema_name = '_ps_trace'",
        is_health_check: false,
    },
    ProbeSpec {
        metrics: &[gauge(
            "chunks_traces_uncompressed_count",
            "The number of traces chunks soon to be compressed by maintenance jobs.",
        )],
        query: "WITH chunk_candidates AS MATERIALIZED ( \
                SELECT chcons.dimension_slice_id \
                FROM _timescaledb_catalog.chunk_constraint chcons \
                    INNER JOIN _timescaledb_catalog.chunk c ON c.id = chcons.chunk_id \
                    INNER JOIN _timescaledb_catalog.hypertable h ON h.id = c.hypertable_id \
                WHERE c.dropped IS FALSE \
                AND h.schema_name = '_ps_trace' \
                AND h.compression_state = 1 \
                AND (c.status & 1) != 1 \
            ) \
            SELECT count(*)::BIGINT \
            FROM chunk_candidates cc \
                INNER JOIN _timescaledb_catalog.dimension_slice ds ON ds.id = cc.dimension_slice_id \
            WHERE ds.range_start <= _timescaledb_internal.time_to_internal(now() - interval '1 hour') \
            AND ds.range_end <= _timescaledb_internal.time_to_internal(now() - interval '1 hour')",
        is_health_check: false,
    },
    ProbeSpec {
        metrics: &[gauge("compression_status", "Compression status in TimescaleDB.")],
        query: "select (case when (value = 'true') then 1 else 0 end) from _prom_catalog.get_default_value('metric_compression') value",
        is_health_check: false,
    },
    ProbeSpec {
        metrics: &[gauge("worker_count", "Number of TimescaleDB background workers.")],
        query: "select current_setting('timescaledb.max_background_workers')::BIGINT",
        is_health_check: false,
    },
    ProbeSpec {
        metrics: &[gauge(
            "worker_maintenance_job",
            "Number of Promscale maintenance workers.",
        )],
        query: "select count(*) from timescaledb_information.jobs where proc_name = 'execute_maintenance_job'",
        is_health_check: false,
    },
    ProbeSpec {
        metrics: &[gauge(
            "worker_maintenance_job_failed",
            "Number of Promscale maintenance jobs that failed.",
        )],
        query: "select count(stats.last_run_status) \
            from timescaledb_information.job_stats stats \
            inner join timescaledb_information.jobs jobs on jobs.job_id = stats.job_id \
            where jobs.proc_name = 'execute_maintenance_job' and stats.last_run_status = 'Failed'",
        is_health_check: false,
    },
    ProbeSpec {
        metrics: &[gauge(
            "worker_maintenance_job_start_timestamp_seconds",
            "Timestamp in unix seconds for last successful execution of Promscale maintenance job.",
        )],
        query: "SELECT extract( \
            epoch FROM (SELECT COALESCE( \
                (SELECT last_run_started_at AS job_running_since \
                    FROM timescaledb_information.job_stats WHERE last_run_started_at > last_successful_finish \
                        AND last_run_status = 'Success' \
                ), \
                CURRENT_TIMESTAMP \
            )))::BIGINT",
        is_health_check: false,
    },
    ProbeSpec {
        metrics: &[gauge("metric_count", "Total number of metrics in the database.")],
        query: METRIC_COUNT_QUERY,
        is_health_check: false,
    },
];

/// A registered probe
#[derive(Debug)]
struct Probe {
    metrics: Vec<Metric>,
    query: &'static str,
    is_health_check: bool,
}

/// Outcome of one [`DatabaseMetrics::update`] pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeReport {
    /// Whether the health check succeeded
    pub healthy: bool,
    /// Non-health probes whose result was recorded
    pub succeeded: usize,
    /// Non-health probes that failed or returned a malformed row
    pub failed: usize,
}

/// Database probes bound to their registered metrics
#[derive(Debug)]
pub struct DatabaseMetrics {
    probes: Vec<Probe>,
    up: Arc<Gauge>,
    network_latency: Arc<Gauge>,
    health_errors: Arc<Counter>,
    probe_errors: Arc<Counter>,
}

impl DatabaseMetrics {
    /// Register every probe metric with `registry`
    pub fn register(registry: &MetricsRegistry) -> Result<Self> {
        let health_errors = registry.counter(
            Opts::new(
                "health_check_errors_total",
                "Total number of database health check errors.",
            )
            .namespace(PROM_NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        let probe_errors = registry.counter(
            Opts::new(
                "probe_errors_total",
                "Total number of failed or malformed database metric queries.",
            )
            .namespace(PROM_NAMESPACE)
            .subsystem(SUBSYSTEM),
        )?;
        let up = registry.gauge(
            Opts::new(
                "up",
                "Up represents if the database metrics engine is running or not.",
            )
            .const_label("type", "promscale_sql"),
        )?;
        let network_latency = registry.gauge(
            Opts::new(
                "network_latency_milliseconds",
                "Network latency between Promscale and Database. A negative value indicates a failed health check.",
            )
            .namespace(PROM_NAMESPACE)
            .subsystem(SUBSYSTEM)
            .const_label("type", "promscale_sql"),
        )?;

        let mut probes = Vec::with_capacity(PROBES.len());
        for spec in PROBES {
            let mut metrics = Vec::with_capacity(spec.metrics.len());
            for m in spec.metrics {
                let opts = Opts::new(m.name, m.help)
                    .namespace(PROM_NAMESPACE)
                    .subsystem(SUBSYSTEM);
                let metric = match m.kind {
                    MetricKind::Gauge => Metric::Gauge(registry.gauge(opts)?),
                    MetricKind::Counter => Metric::Counter(registry.counter(opts)?),
                };
                metrics.push(metric);
            }
            probes.push(Probe {
                metrics,
                query: spec.query,
                is_health_check: spec.is_health_check,
            });
        }

        debug!(probes = probes.len(), "registered database probes");

        Ok(Self {
            probes,
            up,
            network_latency,
            health_errors,
            probe_errors,
        })
    }

    /// Number of probes, health check included
    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Run every probe once and record the results.
    ///
    /// Failures never escape: a failed health check marks the database down
    /// and skips the remaining probes; a failed capacity probe is logged,
    /// counted in `probe_errors_total` and leaves its metrics untouched.
    pub async fn update<E>(&self, executor: &E) -> ProbeReport
    where
        E: QueryExecutor + ?Sized,
    {
        let mut report = ProbeReport::default();

        for probe in &self.probes {
            if probe.is_health_check {
                if !self.check_health(probe, executor).await {
                    return report;
                }
                report.healthy = true;
                continue;
            }

            match executor.query_row(probe.query).await {
                Ok(row) if row.len() == probe.metrics.len() => {
                    for (metric, value) in probe.metrics.iter().zip(row) {
                        metric.record(value);
                    }
                    report.succeeded += 1;
                }
                Ok(row) => {
                    warn!(
                        metric = %probe.metrics[0].opts().fq_name(),
                        expected = probe.metrics.len(),
                        got = row.len(),
                        "probe returned unexpected column count"
                    );
                    self.probe_errors.inc();
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(
                        metric = %probe.metrics[0].opts().fq_name(),
                        error = %e,
                        "database probe failed"
                    );
                    self.probe_errors.inc();
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn check_health<E>(&self, probe: &Probe, executor: &E) -> bool
    where
        E: QueryExecutor + ?Sized,
    {
        let start = Instant::now();
        match executor.query_row(probe.query).await {
            Ok(_) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.up.set(1.0);
                self.network_latency.set(latency_ms);
                probe.metrics[0].record(1.0);
                true
            }
            Err(e) => {
                warn!(error = %e, "database health check failed");
                self.health_errors.inc();
                self.up.set(0.0);
                self.network_latency.set(-1.0);
                false
            }
        }
    }
}
