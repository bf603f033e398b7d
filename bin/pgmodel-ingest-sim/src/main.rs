//! pgmodel ingestion simulator
//!
//! Drives concurrent synthetic label ingestion through the inverted labels
//! cache, resolving misses against an in-memory database, then prints the
//! Prometheus exposition of every registered metric.

mod database;
mod workload;

use anyhow::Result;
use clap::Parser;
use database::SimulatedDatabase;
use pgmodel_cache::InvertedLabelsCache;
use pgmodel_common::Config;
use pgmodel_metrics::{DatabaseMetrics, MetricsRegistry};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workload::WorkerReport;

#[derive(Parser, Debug)]
#[command(name = "pgmodel-ingest-sim")]
#[command(about = "Synthetic label ingestion through the pgmodel label cache")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "pgmodel.toml")]
    config: String,

    /// Number of ingestion workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Label lookups per worker
    #[arg(long)]
    ops: Option<usize>,

    /// Inverted labels cache size in bytes
    #[arg(long, env = "PGMODEL_INVERTED_LABELS_CACHE_SIZE")]
    cache_size: Option<u64>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Run the database probes once after ingestion
    #[arg(long)]
    probe_database: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Merge CLI args with config file (CLI takes precedence)
    let mut config = Config::load(&args.config)?;
    if let Some(workers) = args.workers {
        config.ingest.workers = workers;
    }
    if let Some(ops) = args.ops {
        config.ingest.ops_per_worker = ops;
    }
    if let Some(size) = args.cache_size {
        config.cache.inverted_labels_size = size;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        workers = config.ingest.workers,
        ops_per_worker = config.ingest.ops_per_worker,
        cache_size = config.cache.inverted_labels_size,
        "Starting pgmodel ingestion simulator"
    );

    let registry = MetricsRegistry::new();
    let cache = Arc::new(InvertedLabelsCache::new(
        config.cache.inverted_labels_size,
        &registry,
    )?);
    let db_metrics = DatabaseMetrics::register(&registry)?;
    let db = Arc::new(SimulatedDatabase::new());

    let start = Instant::now();
    let mut handles = Vec::with_capacity(config.ingest.workers);
    for worker in 0..config.ingest.workers {
        let cache = Arc::clone(&cache);
        let db = Arc::clone(&db);
        let workload = config.ingest.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            workload::run_worker(worker, &workload, &cache, &db)
        }));
    }

    let mut total = WorkerReport::default();
    for handle in handles {
        total += handle.await?;
    }
    let elapsed = start.elapsed();

    let stats = cache.stats();
    info!(
        lookups = total.lookups,
        hits = total.hits,
        misses = total.misses,
        rejected = total.rejected,
        hit_ratio = stats.hit_ratio(),
        evictions = stats.evictions,
        entries = stats.elements,
        occupied_bytes = stats.occupied_bytes,
        db_round_trips = db.round_trips(),
        distinct_labels = db.label_count(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Ingestion finished"
    );

    if args.probe_database {
        let report = db_metrics.update(db.as_ref()).await;
        info!(
            healthy = report.healthy,
            succeeded = report.succeeded,
            failed = report.failed,
            probes = db_metrics.probe_count(),
            "Database probes finished"
        );
    }

    print!("{}", registry.export_prometheus());
    Ok(())
}
